use crate::rate_limit::Mode;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "config")]
use serde_json::json;

/// Events emitted by the quota engine, one per decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaEvent {
    /// A consume was admitted and one unit committed.
    Admitted {
        /// Policy the identity was evaluated under.
        policy_id: String,
        /// Units left in the window after this consume.
        remaining: u64,
    },
    /// A consume was rejected because the window budget is spent.
    Rejected {
        /// Policy the identity was evaluated under.
        policy_id: String,
        /// Time until the window rolls over.
        reset_in: Duration,
    },
    /// A read-only check completed.
    Peeked {
        /// Policy the identity was evaluated under.
        policy_id: String,
        /// Whether a consume would currently be admitted.
        allowed: bool,
        /// Units left in the window.
        remaining: u64,
    },
    /// The counter store could not answer; a fallback outcome was returned.
    StoreFailure {
        /// Policy the identity was evaluated under.
        policy_id: String,
        /// Operation that failed.
        mode: Mode,
        /// Whether the fallback admitted the request.
        fallback_allowed: bool,
        /// Rendered store error.
        error: String,
    },
}

impl QuotaEvent {
    pub fn policy_id(&self) -> &str {
        match self {
            QuotaEvent::Admitted { policy_id, .. }
            | QuotaEvent::Rejected { policy_id, .. }
            | QuotaEvent::Peeked { policy_id, .. }
            | QuotaEvent::StoreFailure { policy_id, .. } => policy_id,
        }
    }

    /// Short machine-friendly label, used for metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            QuotaEvent::Admitted { .. } => "admitted",
            QuotaEvent::Rejected { .. } => "rejected",
            QuotaEvent::Peeked { allowed: true, .. } => "peek_allowed",
            QuotaEvent::Peeked { allowed: false, .. } => "peek_denied",
            QuotaEvent::StoreFailure { fallback_allowed: true, .. } => "fallback_open",
            QuotaEvent::StoreFailure { fallback_allowed: false, .. } => "fallback_closed",
        }
    }
}

impl fmt::Display for QuotaEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaEvent::Admitted { policy_id, remaining } => {
                write!(f, "Admitted({}, remaining={})", policy_id, remaining)
            }
            QuotaEvent::Rejected { policy_id, reset_in } => {
                write!(f, "Rejected({}, reset_in={:?})", policy_id, reset_in)
            }
            QuotaEvent::Peeked { policy_id, allowed, remaining } => {
                write!(f, "Peeked({}, allowed={}, remaining={})", policy_id, allowed, remaining)
            }
            QuotaEvent::StoreFailure { policy_id, mode, fallback_allowed, error } => write!(
                f,
                "StoreFailure({}, mode={}, fallback_allowed={}, error={})",
                policy_id, mode, fallback_allowed, error
            ),
        }
    }
}

#[cfg_attr(not(feature = "config"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a QuotaEvent into a JSON value for sinks.
#[cfg(feature = "config")]
pub fn event_to_json(event: &QuotaEvent) -> serde_json::Value {
    match event {
        QuotaEvent::Admitted { policy_id, remaining } => json!({
            "kind": event.kind(),
            "policy_id": policy_id,
            "remaining": *remaining,
        }),
        QuotaEvent::Rejected { policy_id, reset_in } => json!({
            "kind": event.kind(),
            "policy_id": policy_id,
            "reset_in_ms": clamp_u64(reset_in.as_millis()),
        }),
        QuotaEvent::Peeked { policy_id, allowed, remaining } => json!({
            "kind": event.kind(),
            "policy_id": policy_id,
            "allowed": *allowed,
            "remaining": *remaining,
        }),
        QuotaEvent::StoreFailure { policy_id, mode, fallback_allowed, error } => json!({
            "kind": event.kind(),
            "policy_id": policy_id,
            "mode": mode.as_str(),
            "fallback_allowed": *fallback_allowed,
            "error": error,
        }),
    }
}
