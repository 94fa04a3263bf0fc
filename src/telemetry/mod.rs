//! Telemetry for quota decisions.
//!
//! The engine emits one [`QuotaEvent`] per decision. Events flow through `TelemetrySink`
//! implementations, which are plain `tower::Service<QuotaEvent>`s, so they can log, aggregate,
//! or forward to external systems (see the `gatekeeper-prometheus` companion crate).
//!
//! Emission is best effort: a failing sink never changes a quota outcome.

pub mod events;
pub mod sinks;

#[cfg(feature = "config")]
pub use events::event_to_json;
pub use events::QuotaEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
