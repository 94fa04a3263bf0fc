//! Wall-clock sources used to place requests into quota windows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so window boundaries can be controlled in tests.
///
/// Every service instance must agree on window boundaries, so implementations report Unix time
/// rather than a process-local monotonic reading.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds since the Unix epoch.
    fn now_unix_secs(&self) -> u64;
}

/// Clock backed by `SystemTime::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
    }
}

/// Manually driven clock. Clones share the same reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Start the clock at `unix_secs`.
    pub fn new(unix_secs: u64) -> Self {
        Self { now: Arc::new(AtomicU64::new(unix_secs)) }
    }

    pub fn set(&self, unix_secs: u64) {
        self.now.store(unix_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(20);
        assert_eq!(other.now_unix_secs(), 120);
        other.set(5);
        assert_eq!(clock.now_unix_secs(), 5);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(SystemClock.now_unix_secs() > 1_577_836_800);
    }
}
