//! Thread identification
//!
//! Records carry the OS thread id of the calling thread so a parsed trace
//! can attribute every call to its originating thread.

/// OS thread id of the current thread.
///
/// On Linux this is the kernel tid; elsewhere a stable per-thread value
/// derived from the runtime thread id.
#[cfg(target_os = "linux")]
pub fn current_tid() -> u32 {
    // SAFETY: gettid has no preconditions and cannot fail
    (unsafe { libc::gettid() }) as u32
}

#[cfg(not(target_os = "linux"))]
pub fn current_tid() -> u32 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tid_stable_within_thread() {
        assert_eq!(current_tid(), current_tid());
    }

    #[test]
    fn test_tid_differs_across_threads() {
        let here = current_tid();
        let there = std::thread::spawn(current_tid).join().unwrap();
        assert_ne!(here, there);
    }
}
