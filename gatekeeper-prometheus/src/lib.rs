//! Prometheus metrics sink for `gatekeeper`.
//! Bring your own `prometheus::Registry`; the decision counter is registered and incremented.
//!
//! Every [`QuotaEvent`] increments `gatekeeper_decisions_total{policy, decision}`, where
//! `decision` is one of `admitted`, `rejected`, `peek_allowed`, `peek_denied`,
//! `fallback_open` or `fallback_closed`. `policy` is the id of the policy the engine applied, so
//! every unregistered id lands in the single `default` series.

use gatekeeper::telemetry::{QuotaEvent, TelemetrySink};
use prometheus::{IntCounterVec, Registry};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};

/// Name of the decision counter.
pub const DECISIONS_METRIC: &str = "gatekeeper_decisions_total";

#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    decisions: IntCounterVec,
}

impl PrometheusSink {
    /// Create a sink and register its counter into the provided registry.
    ///
    /// # Errors
    /// Returns an error if the metric cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let decisions = IntCounterVec::new(
            prometheus::Opts::new(DECISIONS_METRIC, "Quota decisions by policy and outcome"),
            &["policy", "decision"],
        )?;
        registry.register(Box::new(decisions.clone()))?;
        tracing::debug!(target: "gatekeeper::prometheus", metric = DECISIONS_METRIC, "registered");
        Ok(Self { registry, decisions })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The underlying counter vector.
    pub fn decisions(&self) -> &IntCounterVec {
        &self.decisions
    }
}

impl tower_service::Service<QuotaEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: QuotaEvent) -> Self::Future {
        self.decisions.with_label_values(&[event.policy_id(), event.kind()]).inc();
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}
