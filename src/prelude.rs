//! Convenient re-exports for common Gatekeeper types.
pub use crate::{
    clock::{Clock, ManualClock, SystemClock},
    error::AdmissionError,
    policy::{Policy, PolicyRegistry},
    rate_limit::{
        CounterStore, Identity, InMemoryCounterStore, Increment, Mode, Outcome, QuotaEngine,
        QuotaLayer,
    },
    telemetry::{LogSink, MemorySink, NullSink, QuotaEvent, TelemetrySink},
    window::WindowClock,
};
