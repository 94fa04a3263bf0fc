//! Quota policies and the registry that resolves them by id.
//!
//! The registry is read on every quota decision and written rarely (deploys, operator
//! commands), so the table lives behind an [`ArcSwap`]: readers take a cheap snapshot and never
//! block, writers swap a whole new table in.

use crate::error::PolicyError;
use crate::window::WindowClock;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Window size used when none is configured.
pub const DEFAULT_WINDOW_SIZE_SECS: u64 = 60;
/// Request budget per window used when none is configured.
pub const DEFAULT_MAX_REQUESTS: u64 = 10;
/// Id reported for decisions made under the default policy.
pub const DEFAULT_POLICY_ID: &str = "default";

/// A fixed-window limit: at most `max_requests` units per `window_size_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    window_size_secs: u64,
    max_requests: u64,
}

impl Policy {
    /// Create a validated policy. `max_requests` may be zero, which denies every consume.
    ///
    /// # Examples
    /// ```
    /// use gatekeeper::Policy;
    /// let per_minute = Policy::new(60, 100).unwrap();
    /// assert_eq!(per_minute.max_requests(), 100);
    /// assert!(Policy::new(0, 100).is_err());
    /// ```
    pub fn new(window_size_secs: u64, max_requests: u64) -> Result<Self, PolicyError> {
        if window_size_secs == 0 {
            return Err(PolicyError::InvalidWindowSize(window_size_secs));
        }
        Ok(Self { window_size_secs, max_requests })
    }

    pub fn window_size_secs(&self) -> u64 {
        self.window_size_secs
    }

    pub fn window_size(&self) -> Duration {
        Duration::from_secs(self.window_size_secs)
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Window arithmetic for this policy.
    pub fn window_clock(&self) -> WindowClock {
        WindowClock::new(self.window_size_secs)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self { window_size_secs: DEFAULT_WINDOW_SIZE_SECS, max_requests: DEFAULT_MAX_REQUESTS }
    }
}

#[derive(Debug, Clone, Default)]
struct PolicyTable {
    default: Policy,
    by_id: HashMap<String, Policy>,
}

/// Live-updatable mapping from policy id to [`Policy`].
///
/// Ids without an entry resolve to the default policy. Clones share the same table, so an update
/// through any handle is observed by every engine holding a clone.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    table: Arc<ArcSwap<PolicyTable>>,
}

impl PolicyRegistry {
    /// Create a registry with no named policies.
    pub fn new(default: Policy) -> Self {
        let table = PolicyTable { default, by_id: HashMap::new() };
        Self { table: Arc::new(ArcSwap::from_pointee(table)) }
    }

    /// Builder-style insert.
    pub fn with_policy(self, id: impl Into<String>, policy: Policy) -> Self {
        self.insert(id, policy);
        self
    }

    /// Resolve `policy_id`, falling back to the default policy.
    pub fn resolve(&self, policy_id: &str) -> Policy {
        self.resolve_labeled(policy_id).0
    }

    /// Like [`resolve`](Self::resolve), also returning the id of the policy that applies:
    /// `policy_id` itself when registered, [`DEFAULT_POLICY_ID`] otherwise.
    pub fn resolve_labeled<'a>(&self, policy_id: &'a str) -> (Policy, &'a str) {
        let table = self.table.load();
        match table.by_id.get(policy_id) {
            Some(policy) => (*policy, policy_id),
            None => {
                tracing::debug!(
                    target: "gatekeeper::policy",
                    policy_id,
                    "no policy registered for id; using default"
                );
                (table.default, DEFAULT_POLICY_ID)
            }
        }
    }

    pub fn default_policy(&self) -> Policy {
        self.table.load().default
    }

    /// Whether `policy_id` has an explicit entry.
    pub fn contains(&self, policy_id: &str) -> bool {
        self.table.load().by_id.contains_key(policy_id)
    }

    /// Register or replace a policy. Returns the previous policy for `id`, if any.
    pub fn insert(&self, id: impl Into<String>, policy: Policy) -> Option<Policy> {
        let id = id.into();
        let mut previous = None;
        self.table.rcu(|current| {
            let mut next = PolicyTable::clone(current);
            previous = next.by_id.insert(id.clone(), policy);
            next
        });
        previous
    }

    /// Remove a policy; the id falls back to the default afterwards.
    pub fn remove(&self, id: &str) -> Option<Policy> {
        let mut removed = None;
        self.table.rcu(|current| {
            let mut next = PolicyTable::clone(current);
            removed = next.by_id.remove(id);
            next
        });
        removed
    }

    /// Replace the whole table atomically.
    pub fn replace_all(&self, default: Policy, policies: HashMap<String, Policy>) {
        tracing::info!(
            target: "gatekeeper::policy",
            policies = policies.len(),
            default_window_secs = default.window_size_secs(),
            default_max_requests = default.max_requests(),
            "policy table replaced"
        );
        self.table.store(Arc::new(PolicyTable { default, by_id: policies }));
    }

    /// Snapshot of named policies sorted by id.
    pub fn snapshot(&self) -> Vec<(String, Policy)> {
        let table = self.table.load();
        let mut entries: Vec<(String, Policy)> =
            table.by_id.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}
