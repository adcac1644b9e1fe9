//! Hardware performance-counter collaborator interface
//!
//! The counter backend is an external dependency injected into the session,
//! so capture logic is testable without device hardware.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;

use sightline_shared::types::records::CallId;

/// Opaque handle identifying one kernel launch, used to correlate a counter
/// sample to its call record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchToken {
    pub call_id: CallId,
    pub kernel_name: Option<String>,
}

/// Counter backend interface.
///
/// `read_sample` is the only agent operation allowed to block the calling
/// thread for device completion; implementations must honor `timeout`.
pub trait CounterCollector: Send + Sync {
    /// Counters the backend can collect on this device
    fn list_available_counters(&self) -> Result<BTreeSet<String>>;

    /// Start a collection session for the given counters
    fn begin_session(&self, counters: &[String]) -> Result<()>;

    /// Read one sample for a completed dispatch
    fn read_sample(&self, token: &DispatchToken, timeout: Duration)
        -> Result<Vec<(String, u64)>>;
}

/// Backend used when counter collection is disabled
pub struct NullCollector;

impl CounterCollector for NullCollector {
    fn list_available_counters(&self) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }

    fn begin_session(&self, counters: &[String]) -> Result<()> {
        if counters.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("no counter backend available")
        }
    }

    fn read_sample(
        &self,
        _token: &DispatchToken,
        _timeout: Duration,
    ) -> Result<Vec<(String, u64)>> {
        anyhow::bail!("no counter backend available")
    }
}
