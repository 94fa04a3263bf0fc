//! Quota engine: peek at or consume an identity's quota for the current window.
//!
//! Semantics:
//! - `peek` reads the window counter (absent counts as 0) and never mutates the store.
//! - `consume` is a single atomic store call; see [`CounterStore::increment_within`].
//! - `reset_in` is the time to the next window boundary on every non-fallback outcome.
//!
//! Failure policy (store error or timeout), never surfaced to the caller:
//! - peek fails open: `allowed = true`, `remaining = max_requests`, `reset_in = window size`.
//! - consume fails closed: `allowed = false`, `remaining = 0`, `reset_in = window size`.
//!
//! There is no retry loop: one store round trip per call, bounded by the optional store timeout.
//! Telemetry never adds to that: events go to the sink only if it is ready right away, and are
//! reported under the id of the policy that applied (`"default"` for unregistered ids).
//!
//! Example
//! ```rust
//! use gatekeeper::{Identity, InMemoryCounterStore, Policy, PolicyRegistry, QuotaEngine};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = QuotaEngine::new(InMemoryCounterStore::new())
//!     .with_policies(PolicyRegistry::new(Policy::new(60, 2).unwrap()));
//! let caller = Identity::new("u1", "/api/x", "P");
//!
//! assert_eq!(engine.consume(&caller).await.remaining, 1);
//! assert_eq!(engine.consume(&caller).await.remaining, 0);
//! assert!(!engine.consume(&caller).await.allowed);
//! # });
//! ```

use crate::clock::{Clock, SystemClock};
use crate::error::StoreFailure;
use crate::policy::{Policy, PolicyRegistry};
use crate::rate_limit::store::{CounterStore, Increment};
use crate::rate_limit::{Identity, Mode, Outcome};
use crate::telemetry::{emit_best_effort, NullSink, QuotaEvent, TelemetrySink};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Evaluates identities against their policies using a shared [`CounterStore`].
///
/// Clones share the store, policy registry, clock and telemetry sink.
pub struct QuotaEngine<S, T = NullSink> {
    store: Arc<S>,
    policies: PolicyRegistry,
    clock: Arc<dyn Clock>,
    sink: T,
    store_timeout: Option<Duration>,
}

impl<S, T: Clone> Clone for QuotaEngine<S, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policies: self.policies.clone(),
            clock: self.clock.clone(),
            sink: self.sink.clone(),
            store_timeout: self.store_timeout,
        }
    }
}

impl<S, T> std::fmt::Debug for QuotaEngine<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEngine")
            .field("store", &"<counter store>")
            .field("policies", &self.policies)
            .field("clock", &self.clock)
            .field("sink", &"<telemetry sink>")
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl<S> QuotaEngine<S, NullSink>
where
    S: CounterStore + 'static,
{
    /// Create an engine with the default policy registry, the system clock, no telemetry and no
    /// store timeout.
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
            policies: PolicyRegistry::default(),
            clock: Arc::new(SystemClock),
            sink: NullSink,
            store_timeout: None,
        }
    }
}

impl<S, T> QuotaEngine<S, T>
where
    S: CounterStore + 'static,
    T: TelemetrySink,
    <T as tower::Service<QuotaEvent>>::Future: Send + 'static,
{
    /// Resolve policies through `policies`.
    pub fn with_policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = policies;
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Treat store calls slower than `timeout` as failures. Panics if `timeout` is zero.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        assert!(timeout > Duration::ZERO, "store timeout must be non-zero");
        self.store_timeout = Some(timeout);
        self
    }

    /// Send one event per decision to `sink`.
    pub fn with_telemetry<U>(self, sink: U) -> QuotaEngine<S, U>
    where
        U: TelemetrySink,
    {
        QuotaEngine {
            store: self.store,
            policies: self.policies,
            clock: self.clock,
            sink,
            store_timeout: self.store_timeout,
        }
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluate `identity` in `mode`.
    pub async fn evaluate(&self, identity: &Identity, mode: Mode) -> Outcome {
        match mode {
            Mode::Peek => self.peek(identity).await,
            Mode::Consume => self.consume(identity).await,
        }
    }

    /// Read-only check of `identity`'s quota.
    pub async fn peek(&self, identity: &Identity) -> Outcome {
        let (policy, label) = self.policies.resolve_labeled(identity.policy_id());
        let window = policy.window_clock();
        let now = self.clock.now_unix_secs();
        let key = identity.counter_key(window.current_window(now));
        let max = policy.max_requests();

        match self.bounded(self.store.get(&key)).await {
            Ok(value) => {
                let count = value.unwrap_or(0);
                let outcome = Outcome::new(
                    count < max,
                    max.saturating_sub(count),
                    window.time_to_next_window(now),
                );
                tracing::debug!(
                    target: "gatekeeper::engine",
                    key = %key,
                    count,
                    max,
                    allowed = outcome.allowed,
                    "quota peek"
                );
                self.emit(QuotaEvent::Peeked {
                    policy_id: label.to_string(),
                    allowed: outcome.allowed,
                    remaining: outcome.remaining,
                });
                outcome
            }
            Err(failure) => self.fallback(label, Mode::Peek, &key, &policy, failure),
        }
    }

    /// Atomically check and commit one unit of `identity`'s quota.
    pub async fn consume(&self, identity: &Identity) -> Outcome {
        let (policy, label) = self.policies.resolve_labeled(identity.policy_id());
        let window = policy.window_clock();
        let now = self.clock.now_unix_secs();
        let key = identity.counter_key(window.current_window(now));
        let max = policy.max_requests();

        let call = self.store.increment_within(&key, max, policy.window_size());
        match self.bounded(call).await {
            Ok(Increment { allowed, count }) => {
                let reset_in = window.time_to_next_window(now);
                let remaining = if allowed { max.saturating_sub(count) } else { 0 };
                tracing::debug!(
                    target: "gatekeeper::engine",
                    key = %key,
                    count,
                    max,
                    allowed,
                    "quota consume"
                );
                let policy_id = label.to_string();
                let event = if allowed {
                    QuotaEvent::Admitted { policy_id, remaining }
                } else {
                    QuotaEvent::Rejected { policy_id, reset_in }
                };
                self.emit(event);
                Outcome::new(allowed, remaining, reset_in)
            }
            Err(failure) => self.fallback(label, Mode::Consume, &key, &policy, failure),
        }
    }

    async fn bounded<V, F>(&self, call: F) -> Result<V, StoreFailure<S::Error>>
    where
        F: Future<Output = Result<V, S::Error>>,
    {
        match self.store_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(StoreFailure::Store),
                Err(_) => Err(StoreFailure::Timeout(limit)),
            },
            None => call.await.map_err(StoreFailure::Store),
        }
    }

    fn fallback(
        &self,
        label: &str,
        mode: Mode,
        key: &str,
        policy: &Policy,
        failure: StoreFailure<S::Error>,
    ) -> Outcome {
        let outcome = match mode {
            Mode::Peek => Outcome::fail_open(policy.max_requests(), policy.window_size()),
            Mode::Consume => Outcome::fail_closed(policy.window_size()),
        };
        tracing::error!(
            target: "gatekeeper::engine",
            key,
            mode = %mode,
            error = %failure,
            fallback_allowed = outcome.allowed,
            "counter store unavailable; returning fallback outcome"
        );
        self.emit(QuotaEvent::StoreFailure {
            policy_id: label.to_string(),
            mode,
            fallback_allowed: outcome.allowed,
            error: failure.to_string(),
        });
        outcome
    }

    fn emit(&self, event: QuotaEvent) {
        emit_best_effort(self.sink.clone(), event);
    }
}
