use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Result of an atomic conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    /// Whether the unit was committed.
    pub allowed: bool,
    /// Counter value after the call: the new value when allowed, the unchanged value otherwise.
    pub count: u64,
}

/// Shared counter storage for quota windows.
///
/// Keys are opaque strings built by the engine; values are non-negative unit counts. Any
/// backend offering an atomic compare-and-increment with expiry (server-side script,
/// transaction, CAS loop) can implement this trait.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current value for `key`; `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, Self::Error>;

    /// Atomically: read `key` (absent counts as 0); if the value is below `max`, increment it and,
    /// when the new value is 1, set the key to expire after `ttl`. Otherwise leave it untouched.
    ///
    /// Implementations must not allow two concurrent callers to both observe `max - 1` and both
    /// increment.
    async fn increment_within(
        &self,
        key: &str,
        max: u64,
        ttl: Duration,
    ) -> Result<Increment, Self::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    expires_at: u64,
}

/// Expired entries are swept at most this often (in clock seconds), on the write path.
const SWEEP_INTERVAL_SECS: u64 = 1;

#[derive(Debug, Default)]
struct Counters {
    entries: HashMap<String, Entry>,
    next_sweep_at: u64,
}

impl Counters {
    /// Drop expired entries; returns how many were removed.
    fn sweep(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        self.next_sweep_at = now.saturating_add(SWEEP_INTERVAL_SECS);
        before - self.entries.len()
    }
}

/// Process-local counter store.
///
/// The mutex makes each `increment_within` indivisible, so the quota holds for every task in
/// this process. It does not coordinate across processes; use a shared backend for that.
///
/// Every window gets a fresh key, so expired counters are reclaimed by the store itself: writes
/// sweep them out at most once per clock second.
#[derive(Clone, Debug)]
pub struct InMemoryCounterStore {
    data: Arc<Mutex<Counters>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Use `clock` to decide when entries expire.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { data: Arc::new(Mutex::new(Counters::default())), clock: Arc::new(clock) }
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_unix_secs();
        self.lock().entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seconds left before `key` expires, if it is live.
    pub fn ttl_secs(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_unix_secs();
        self.lock().entries.get(key).filter(|e| e.expires_at > now).map(|e| e.expires_at - now)
    }

    /// Drop every expired entry now, without waiting for the next write.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_unix_secs();
        self.lock().sweep(now)
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<u64>, Self::Error> {
        let now = self.clock.now_unix_secs();
        let guard = self.lock();
        Ok(guard.entries.get(key).filter(|e| e.expires_at > now).map(|e| e.count))
    }

    async fn increment_within(
        &self,
        key: &str,
        max: u64,
        ttl: Duration,
    ) -> Result<Increment, Self::Error> {
        let now = self.clock.now_unix_secs();
        let mut guard = self.lock();
        if now >= guard.next_sweep_at {
            guard.sweep(now);
        }

        let current = match guard.entries.get(key) {
            Some(entry) if entry.expires_at > now => entry.count,
            _ => 0,
        };
        if current >= max {
            return Ok(Increment { allowed: false, count: current });
        }

        let count = current + 1;
        if count == 1 {
            let expires_at = now.saturating_add(ttl.as_secs().max(1));
            guard.entries.insert(key.to_string(), Entry { count, expires_at });
        } else if let Some(entry) = guard.entries.get_mut(key) {
            entry.count = count;
        }
        Ok(Increment { allowed: true, count })
    }
}
