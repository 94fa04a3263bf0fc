#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Gatekeeper
//!
//! Distributed fixed-window quotas for Rust services: any number of stateless instances agree
//! on one quota per identity through a shared counter store.
//!
//! ## Features
//!
//! - **Peek / consume** evaluation of `(subject, resource, policy)` identities
//! - **Atomic store protocol**: read, check, increment and expire in one store operation
//! - **Fail-open peeks, fail-closed consumes** when the store is unreachable
//! - **Per-policy limits** resolved from a live-updatable registry
//! - **Tower middleware** charging one unit per request
//! - **Pluggable telemetry** sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use gatekeeper::{Identity, InMemoryCounterStore, Policy, PolicyRegistry, QuotaEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let policies = PolicyRegistry::default()
//!         .with_policy("ORDERS-PER-MINUTE", Policy::new(60, 100).unwrap());
//!     let engine = QuotaEngine::new(InMemoryCounterStore::new()).with_policies(policies);
//!
//!     let caller = Identity::new("user123", "/api/orders", "ORDERS-PER-MINUTE");
//!     let outcome = engine.consume(&caller).await;
//!     assert!(outcome.allowed);
//!     assert_eq!(outcome.remaining, 99);
//! }
//! ```
//!
//! Share quotas across processes by swapping the in-memory store for a shared backend such as
//! `gatekeeper-redis`.

pub mod clock;
#[cfg(feature = "config")]
pub mod config;
pub mod error;
pub mod policy;
pub mod prelude;
pub mod rate_limit;
pub mod telemetry;
pub mod window;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
#[cfg(feature = "config")]
pub use config::{PolicyConfig, PolicySpec};
#[cfg(feature = "config")]
pub use error::ConfigError;
pub use error::{AdmissionError, PolicyError, StoreFailure};
pub use policy::{
    Policy, PolicyRegistry, DEFAULT_MAX_REQUESTS, DEFAULT_POLICY_ID, DEFAULT_WINDOW_SIZE_SECS,
};
pub use rate_limit::{
    CounterStore, Identity, InMemoryCounterStore, Increment, Mode, Outcome, QuotaEngine,
    QuotaLayer, QuotaService,
};
pub use window::WindowClock;
