use crate::error::AdmissionError;
use crate::rate_limit::{CounterStore, Identity, QuotaEngine};
use crate::telemetry::{NullSink, QuotaEvent, TelemetrySink};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that consumes one unit of quota per request before calling the inner service.
///
/// `identify` maps each request to the [`Identity`] it is charged to.
pub struct QuotaLayer<St, F, T = NullSink> {
    engine: QuotaEngine<St, T>,
    identify: Arc<F>,
}

impl<St, F, T> QuotaLayer<St, F, T> {
    /// Create a new quota layer.
    pub fn new(engine: QuotaEngine<St, T>, identify: F) -> Self {
        Self { engine, identify: Arc::new(identify) }
    }
}

impl<St, F, T: Clone> Clone for QuotaLayer<St, F, T> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), identify: self.identify.clone() }
    }
}

impl<St, F, T> fmt::Debug for QuotaLayer<St, F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaLayer")
            .field("engine", &self.engine)
            .field("identify", &"<fn>")
            .finish()
    }
}

impl<S, St, F, T: Clone> Layer<S> for QuotaLayer<St, F, T> {
    type Service = QuotaService<S, St, F, T>;

    fn layer(&self, service: S) -> Self::Service {
        QuotaService {
            inner: service,
            engine: self.engine.clone(),
            identify: self.identify.clone(),
        }
    }
}

/// Middleware service that enforces quotas.
pub struct QuotaService<S, St, F, T = NullSink> {
    inner: S,
    engine: QuotaEngine<St, T>,
    identify: Arc<F>,
}

impl<S: Clone, St, F, T: Clone> Clone for QuotaService<S, St, F, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
            identify: self.identify.clone(),
        }
    }
}

impl<S: fmt::Debug, St, F, T> fmt::Debug for QuotaService<S, St, F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaService")
            .field("inner", &self.inner)
            .field("engine", &self.engine)
            .finish()
    }
}

impl<S, St, F, T, Req> Service<Req> for QuotaService<S, St, F, T>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    St: CounterStore + 'static,
    F: Fn(&Req) -> Identity + Send + Sync + 'static,
    T: TelemetrySink,
    <T as Service<QuotaEvent>>::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let engine = self.engine.clone();
        let identity = (self.identify)(&req);
        // Take the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let outcome = engine.consume(&identity).await;
            if !outcome.allowed {
                return Err(AdmissionError::Denied {
                    remaining: outcome.remaining,
                    reset_in: outcome.reset_in,
                });
            }
            inner.call(req).await.map_err(AdmissionError::Inner)
        })
    }
}
