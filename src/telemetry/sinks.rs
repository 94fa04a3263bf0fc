//! Built-in sinks and the emit helper the engine uses.

use super::events::QuotaEvent;
use futures::FutureExt;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tower::{Service, ServiceExt};

/// A destination for quota events.
pub trait TelemetrySink:
    Service<QuotaEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Hand `event` to `sink` without waiting on it.
///
/// Readiness is polled exactly once: a sink that is not ready, or reports an error, loses the
/// event. The sink's response future runs detached on the current Tokio runtime (or is polled
/// once when there is no runtime). Returns whether the sink accepted the event.
pub fn emit_best_effort<S>(mut sink: S, event: QuotaEvent) -> bool
where
    S: Service<QuotaEvent, Response = ()> + Send + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    let kind = event.kind();
    match sink.ready().now_or_never() {
        Some(Ok(accepting)) => {
            let response = accepting.call(event);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = response.await;
                    });
                }
                Err(_) => {
                    let _ = response.now_or_never();
                }
            }
            true
        }
        Some(Err(error)) => {
            tracing::debug!(target: "gatekeeper::telemetry", kind, %error, "sink failed; event dropped");
            false
        }
        None => {
            tracing::debug!(target: "gatekeeper::telemetry", kind, "sink busy; event dropped");
            false
        }
    }
}

/// Discards every event. The engine's default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl Service<QuotaEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: QuotaEvent) -> Self::Future {
        ready(Ok(()))
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Writes each event as a `tracing` record under `gatekeeper::telemetry`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl Service<QuotaEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        tracing::info!(
            target: "gatekeeper::telemetry",
            policy_id = event.policy_id(),
            decision = event.kind(),
            "{event}"
        );
        ready(Ok(()))
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps the latest events in memory; the oldest are dropped past `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<QuotaEvent>>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1_024)))), capacity }
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> Vec<QuotaEvent> {
        self.buffer().iter().cloned().collect()
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<QuotaEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<QuotaEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        let mut buffer = self.buffer();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
        ready(Ok(()))
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
