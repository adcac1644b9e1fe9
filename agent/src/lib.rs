//! Sightline capture agent
//!
//! Runs inside the profiled process: wraps GPU compute-API entry points with
//! timing wrappers, captures per-call records (and, for kernel dispatches,
//! optional hardware-counter samples), and streams everything to a trace
//! file through a bounded, non-blocking writer.
//!
//! The agent is loaded and unloaded by an external injection collaborator;
//! all capture state is scoped to a [`CaptureSession`] so independent
//! sessions never share state.

pub mod apis;
pub mod config;
pub mod counters;
pub mod entry_table;
pub mod interceptor;
pub mod markers;
pub mod session;
pub mod writer;

pub use config::{CaptureConfig, DeviceLimits};
pub use counters::{CounterCollector, DispatchToken, NullCollector};
pub use entry_table::{DispatchTable, EntryFn, InstallError, WrapperTable};
pub use markers::MarkerScope;
pub use session::{CaptureReport, CaptureSession, KernelResources};
