//! Error types for policies, configuration, store round trips and admission.
//!
//! Store failures never reach callers of the quota engine: they are turned into fallback
//! outcomes. [`StoreFailure`] exists so those failures can be logged and reported uniformly.

use std::time::Duration;

/// Errors produced when validating a [`Policy`](crate::Policy).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// `window_size_secs` must be > 0.
    #[error("window_size_secs must be > 0 (got {0})")]
    InvalidWindowSize(u64),
}

/// Errors produced when loading policies from declarative configuration.
#[cfg(feature = "config")]
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The document is not valid JSON or does not match the expected shape.
    #[error("invalid policy configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// A policy entry failed validation.
    #[error("policy '{id}': {source}")]
    Policy {
        /// Policy id, or `default` for the fallback policy.
        id: String,
        #[source]
        source: PolicyError,
    },
}

/// A counter-store round trip that did not produce an answer.
#[derive(thiserror::Error, Debug)]
pub enum StoreFailure<E> {
    /// The store returned an error.
    #[error("counter store error: {0}")]
    Store(#[source] E),
    /// The store did not answer within the configured bound.
    #[error("counter store call exceeded {0:?}")]
    Timeout(Duration),
}

impl<E> StoreFailure<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Error returned by [`QuotaService`](crate::rate_limit::QuotaService).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError<E> {
    /// The identity's quota is exhausted for the current window.
    #[error("quota exhausted; resets in {reset_in:?}")]
    Denied {
        /// Units left in the window (always 0 on denial).
        remaining: u64,
        /// Time until the window rolls over.
        reset_in: Duration,
    },
    /// The wrapped service failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> AdmissionError<E> {
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    /// Get the inner error if this is an `Inner` variant.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied { .. } => None,
        }
    }

    /// Suggested `Retry-After` for denials.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Denied { reset_in, .. } => Some(*reset_in),
            Self::Inner(_) => None,
        }
    }
}
