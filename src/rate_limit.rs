//! Distributed fixed-window quotas.
//!
//! This module provides the building blocks for quota enforcement:
//! - [`QuotaEngine`]: peek at or consume one unit of an identity's quota.
//! - [`CounterStore`]: the shared counter capability the engine delegates to.
//! - [`QuotaLayer`]: Tower middleware that consumes one unit per request.
//!
//! # Architecture
//!
//! - **Engine**: stateless per call. Resolves the policy, places `now` in a window and asks the
//!   store a single question. Store failures become fallback outcomes: a peek fails open, a
//!   consume fails closed.
//! - **Storage**: `CounterStore` implementations own atomicity. The read-check-increment-expire
//!   sequence of a consume is one indivisible store operation, so the quota holds across every
//!   service instance sharing the store.
//! - **Middleware**: `QuotaLayer` wraps your service and only knows how to ask the engine.

use std::fmt;
use std::time::Duration;

pub mod engine;
pub mod middleware;
pub mod store;

pub use engine::QuotaEngine;
pub use middleware::{QuotaLayer, QuotaService};
pub use store::{CounterStore, InMemoryCounterStore, Increment};

/// Who is being limited, on which resource, under which policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    subject_id: String,
    resource_path: String,
    policy_id: String,
}

impl Identity {
    pub fn new(
        subject_id: impl Into<String>,
        resource_path: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            resource_path: resource_path.into(),
            policy_id: policy_id.into(),
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    /// Counter key for this identity in `window`: `rate:{policy_id}:{subject_id}:{window}`.
    ///
    /// The resource path is not part of the key; one quota covers every resource the policy is
    /// applied to.
    pub fn counter_key(&self, window: u64) -> String {
        format!("rate:{}:{}:{}", self.policy_id, self.subject_id, window)
    }
}

/// Whether an evaluation may commit consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Read-only check.
    Peek,
    /// Check and commit one unit.
    Consume,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Peek => "peek",
            Mode::Consume => "consume",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of a quota evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Units left in the current window.
    /// Useful for `X-RateLimit-Remaining` headers.
    pub remaining: u64,
    /// Time until the window rolls over; within `(0, window_size]`.
    /// Useful for `Retry-After` headers.
    pub reset_in: Duration,
}

impl Outcome {
    pub fn new(allowed: bool, remaining: u64, reset_in: Duration) -> Self {
        Self { allowed, remaining, reset_in }
    }

    /// Whole seconds until reset, as transports usually report it.
    pub fn reset_in_secs(&self) -> u64 {
        self.reset_in.as_secs()
    }

    /// Fallback for a peek that could not reach the store.
    pub(crate) fn fail_open(max_requests: u64, window_size: Duration) -> Self {
        Self::new(true, max_requests, window_size)
    }

    /// Fallback for a consume that could not reach the store.
    pub(crate) fn fail_closed(window_size: Duration) -> Self {
        Self::new(false, 0, window_size)
    }
}
