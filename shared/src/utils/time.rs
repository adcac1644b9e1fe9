//! Time-related utilities
//!
//! Record timestamps come from a monotonic clock anchored to the wall clock
//! at trace start, so per-thread timestamps are non-decreasing even when the
//! system clock steps.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Get the current system time in nanoseconds since UNIX epoch
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_nanos() as u64
}

/// Format an epoch-nanosecond timestamp for the file header
pub fn display_nanos(nanos: u64) -> String {
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec = (nanos % 1_000_000_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, subsec) {
        Some(dt) => dt.to_rfc3339(),
        None => nanos.to_string(),
    }
}

/// Monotonic clock anchored to the wall clock at construction.
///
/// `now_ns` values are comparable to the header's trace start time and never
/// go backwards within a process.
#[derive(Debug, Clone)]
pub struct TraceClock {
    wall_start_ns: u64,
    instant_start: Instant,
}

impl TraceClock {
    pub fn start() -> Self {
        Self {
            wall_start_ns: system_time_nanos(),
            instant_start: Instant::now(),
        }
    }

    /// Wall-clock nanoseconds at trace start
    pub fn start_ns(&self) -> u64 {
        self.wall_start_ns
    }

    /// Current timestamp in wall-anchored nanoseconds
    pub fn now_ns(&self) -> u64 {
        self.wall_start_ns + self.instant_start.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time() {
        // Basic sanity check
        assert!(system_time_nanos() > 1_600_000_000 * 1_000_000_000); // After 2020
    }

    #[test]
    fn test_clock_monotonic() {
        let clock = TraceClock::start();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
        assert!(a >= clock.start_ns());
    }

    #[test]
    fn test_display_nanos() {
        let s = display_nanos(1_700_000_000_000_000_000);
        assert!(s.starts_with("2023-11-14T"));
    }
}
