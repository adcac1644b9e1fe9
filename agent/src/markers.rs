//! Perf-marker capture API
//!
//! User-inserted named timing regions, written to the trace alongside API
//! call records. Begin/end events carry the calling thread's id; nesting is
//! reconstructed and validated at parse time.

use crate::session::CaptureSession;

/// RAII guard that ends its marker region when dropped
pub struct MarkerScope<'a> {
    session: &'a CaptureSession,
}

impl<'a> MarkerScope<'a> {
    pub(crate) fn new(session: &'a CaptureSession) -> Self {
        Self { session }
    }
}

impl Drop for MarkerScope<'_> {
    fn drop(&mut self) {
        self.session.end_marker();
    }
}
