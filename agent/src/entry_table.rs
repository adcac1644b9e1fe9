//! Entry-point tables
//!
//! A [`DispatchTable`] models the runtime's real function table for one API
//! family. Installing it produces a parallel [`WrapperTable`] in which every
//! known, non-excluded entry is replaced by a timing wrapper and everything
//! else is the untouched real function. Failing to wrap one entry never
//! affects the others.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use sightline_shared::types::records::{ApiFamily, ApiValue};

use crate::apis;
use crate::interceptor::AgentInner;

/// Signature shared by real entry points and their wrappers
pub type EntryFn = Arc<dyn Fn(&[ApiValue]) -> ApiValue + Send + Sync>;

/// Installation failure; never raised for individual entry points
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstallError {
    #[error("family {0:?} is already installed in this session")]
    AlreadyInstalled(ApiFamily),

    #[error("family {0:?} is not installed in this session")]
    NotInstalled(ApiFamily),
}

/// The real function table exposed by a runtime for one API family
#[derive(Clone)]
pub struct DispatchTable {
    family: ApiFamily,
    entries: BTreeMap<String, EntryFn>,
}

impl DispatchTable {
    pub fn new(family: ApiFamily) -> Self {
        Self {
            family,
            entries: BTreeMap::new(),
        }
    }

    pub fn family(&self) -> ApiFamily {
        self.family
    }

    /// Register one real entry point
    pub fn insert(&mut self, name: impl Into<String>, f: EntryFn) {
        self.entries.insert(name.into(), f);
    }

    pub fn get(&self, name: &str) -> Option<&EntryFn> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// The replacement table handed back to the runtime
pub struct WrapperTable {
    family: ApiFamily,
    entries: BTreeMap<String, EntryFn>,
    wrapped: BTreeSet<String>,
}

impl std::fmt::Debug for WrapperTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapperTable")
            .field("family", &self.family)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("wrapped", &self.wrapped)
            .finish()
    }
}

impl WrapperTable {
    pub fn family(&self) -> ApiFamily {
        self.family
    }

    pub fn entry(&self, name: &str) -> Option<&EntryFn> {
        self.entries.get(name)
    }

    /// Invoke an entry by name; None when the runtime never exposed it
    pub fn invoke(&self, name: &str, args: &[ApiValue]) -> Option<ApiValue> {
        self.entries.get(name).map(|f| f(args))
    }

    /// Whether this entry is a timing wrapper (vs. a pass-through)
    pub fn is_wrapped(&self, name: &str) -> bool {
        self.wrapped.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the wrapper table for a dispatch table.
///
/// Entries without a descriptor, and entries the configuration excludes,
/// keep their real function object.
pub(crate) fn build_wrapper_table(
    agent: &Arc<AgentInner>,
    dispatch: &DispatchTable,
) -> WrapperTable {
    let family = dispatch.family;
    let mut entries = BTreeMap::new();
    let mut wrapped = BTreeSet::new();

    for (name, real) in &dispatch.entries {
        if agent.config.excluded_apis.contains(name) {
            debug!(name, "entry point excluded from wrapping");
            entries.insert(name.clone(), Arc::clone(real));
            continue;
        }
        let Some(desc) = apis::find_descriptor(family, name) else {
            debug!(name, "unrecognized entry point passed through");
            entries.insert(name.clone(), Arc::clone(real));
            continue;
        };

        let agent = Arc::clone(agent);
        let real_fn = Arc::clone(real);
        let wrapper: EntryFn = Arc::new(move |args: &[ApiValue]| {
            agent.intercepted_call(family, desc, &real_fn, args)
        });
        entries.insert(name.clone(), wrapper);
        wrapped.insert(name.clone());
    }

    WrapperTable {
        family,
        entries,
        wrapped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn real_entry(ret: i32) -> EntryFn {
        Arc::new(move |_args: &[ApiValue]| ApiValue::Status(ret))
    }

    #[test]
    fn test_dispatch_table_basics() {
        let mut table = DispatchTable::new(ApiFamily::OpenCl);
        assert!(table.is_empty());
        table.insert("clFinish", real_entry(0));
        assert_eq!(table.len(), 1);
        assert!(table.get("clFinish").is_some());
        assert!(table.get("clFlush").is_none());
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["clFinish"]);
    }
}
