//! Fixed-window arithmetic.
//!
//! A window is the integer `floor(unix_secs / size)`. Windows are derived, never stored; they
//! only appear as the last segment of a counter key.

use std::time::Duration;

/// Maps Unix time onto discrete windows of a fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowClock {
    size_secs: u64,
}

impl WindowClock {
    /// Create a window clock. Panics if `size_secs` is zero.
    pub fn new(size_secs: u64) -> Self {
        assert!(size_secs > 0, "window size must be non-zero");
        Self { size_secs }
    }

    pub fn size_secs(&self) -> u64 {
        self.size_secs
    }

    /// Window size as a `Duration`.
    pub fn size(&self) -> Duration {
        Duration::from_secs(self.size_secs)
    }

    /// Index of the window containing `now`.
    pub fn current_window(&self, now: u64) -> u64 {
        now / self.size_secs
    }

    /// First second of `window`.
    pub fn window_start(&self, window: u64) -> u64 {
        window.saturating_mul(self.size_secs)
    }

    /// Time left until the next window boundary; always within `1..=size` seconds.
    pub fn time_to_next_window(&self, now: u64) -> Duration {
        let next = self.window_start(self.current_window(now) + 1);
        Duration::from_secs(next.saturating_sub(now))
    }
}
