//! Trace record type definitions
//!
//! These types are produced by the capture agent while a traced application
//! runs and are reconstructed, read-only, when a trace file is parsed.

use serde::{Deserialize, Serialize};

use crate::types::classify::ApiCategory;

/// Timestamp in nanoseconds
pub type Timestamp = u64;

/// OS thread id of the thread that made an API call
pub type Tid = u32;

/// Unique, monotonically assigned id of one captured API call
pub type CallId = u64;

/// API family an entry point belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApiFamily {
    OpenCl,
    Hsa,
}

impl ApiFamily {
    /// Short name used in section tags and header keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFamily::OpenCl => "ocl",
            ApiFamily::Hsa => "hsa",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ocl" => Some(ApiFamily::OpenCl),
            "hsa" => Some(ApiFamily::Hsa),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApiFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single API argument or return value as observed by a wrapper.
///
/// Wrappers never interpret these beyond formatting them into the argument
/// snapshot; the value handed to the real entry point is always the caller's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApiValue {
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    /// Opaque handle or pointer, formatted as hex
    Ptr(u64),
    Str(String),
    /// API status/error code (e.g. a cl_int return)
    Status(i32),
    /// No value (void return)
    Unit,
}

impl std::fmt::Display for ApiValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiValue::U32(v) => write!(f, "{v}"),
            ApiValue::U64(v) => write!(f, "{v}"),
            ApiValue::I32(v) => write!(f, "{v}"),
            ApiValue::I64(v) => write!(f, "{v}"),
            ApiValue::Ptr(p) => write!(f, "{p:#x}"),
            ApiValue::Str(s) => f.write_str(s),
            ApiValue::Status(c) => write!(f, "{c}"),
            ApiValue::Unit => Ok(()),
        }
    }
}

/// One intercepted API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallRecord {
    /// Unique within a trace file, assigned in capture order
    pub call_id: CallId,

    pub family: ApiFamily,

    /// Entry-point name, e.g. `clEnqueueNDRangeKernel`
    pub name: String,

    pub category: ApiCategory,

    /// Thread that made the call
    pub tid: Tid,

    pub start_ns: Timestamp,
    pub end_ns: Timestamp,

    /// Argument snapshot in `name=value;name=value` form; empty when the
    /// snapshot was skipped or failed
    pub args: String,

    /// Formatted return value; empty for void returns
    pub ret: String,

    /// Link to the counter sample taken for this call, if any
    pub sample_id: Option<u64>,

    /// Number of consecutive identical polling calls collapsed into this
    /// record; 1 for ordinary calls
    pub repeat: u32,
}

impl ApiCallRecord {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }
}

/// Hardware performance-counter values read for one kernel dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSample {
    pub sample_id: u64,

    /// Dispatch call this sample belongs to
    pub call_id: CallId,

    /// Counter name/value pairs in session order
    pub values: Vec<(String, u64)>,
}

/// Begin or end of a user-inserted timing region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerKind {
    Begin,
    End,
}

/// One perf-marker event; `name` and `group` are empty for `End` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub kind: MarkerKind,
    pub tid: Tid,
    pub ts_ns: Timestamp,
    pub name: String,
    pub group: String,
}

/// Compute-resource utilization of one kernel dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyRecord {
    /// Dispatch call that produced this record
    pub call_id: CallId,
    pub tid: Tid,

    pub kernel_name: String,
    pub device_name: String,

    pub compute_units: u32,
    pub simds_per_cu: u32,
    pub max_waves_per_cu: u32,
    pub wavefront_size: u32,

    pub work_group_size: u32,
    pub waves_per_work_group: u32,

    pub vgprs_used: u32,
    pub vgprs_max: u32,
    pub sgprs_used: u32,
    pub sgprs_max: u32,
    pub lds_used: u32,
    pub lds_max: u32,

    /// Fraction of available wave slots used, in percent
    pub occupancy_pct: f64,
}

/// One kernel-symbol entry; demangling is performed by an external
/// collaborator when the merged model is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub address: u64,
    pub mangled: String,
    pub demangled: Option<String>,
}

/// Trace-file header: format version plus producer/process metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHeader {
    pub version_major: u32,
    pub version_minor: u32,

    /// Version of the profiler that produced the file
    pub producer_version: String,

    pub application: String,
    pub application_args: String,
    pub working_directory: String,
    pub os_version: String,
    pub pid: u32,

    /// Wall-clock nanoseconds at trace start
    pub trace_start_ns: Timestamp,

    /// Counter names active during capture
    pub counters: Vec<String>,

    /// Entry points excluded from wrapping
    pub excluded_apis: Vec<String>,
}

/// Trace-file footer: capture-side loss accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFooter {
    /// Records dropped by the writer at capacity
    pub dropped: u64,

    /// Capture degradations (argument or counter capture failed)
    pub degraded: u64,

    /// True when the writer shut down in order; a parsed file without a
    /// footer is reported as truncated
    pub clean: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names_roundtrip() {
        for family in [ApiFamily::OpenCl, ApiFamily::Hsa] {
            assert_eq!(ApiFamily::from_str(family.as_str()), Some(family));
        }
        assert_eq!(ApiFamily::from_str("cuda"), None);
    }

    #[test]
    fn test_api_value_formatting() {
        assert_eq!(ApiValue::Ptr(0xdeadbeef).to_string(), "0xdeadbeef");
        assert_eq!(ApiValue::Status(-5).to_string(), "-5");
        assert_eq!(ApiValue::Unit.to_string(), "");
        assert_eq!(ApiValue::Str("global".into()).to_string(), "global");
    }

    #[test]
    fn test_call_duration_saturates() {
        let rec = ApiCallRecord {
            call_id: 1,
            family: ApiFamily::OpenCl,
            name: "clFinish".into(),
            category: ApiCategory::Synchronization,
            tid: 7,
            start_ns: 100,
            end_ns: 40,
            args: String::new(),
            ret: "0".into(),
            sample_id: None,
            repeat: 1,
        };
        assert_eq!(rec.duration_ns(), 0);
    }
}
