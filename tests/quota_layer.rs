use async_trait::async_trait;
use gatekeeper::{
    AdmissionError, CounterStore, Identity, InMemoryCounterStore, Increment, ManualClock, Policy,
    PolicyRegistry, QuotaEngine, QuotaLayer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, ServiceBuilder, ServiceExt};

#[derive(Debug, Clone)]
struct Request {
    user: &'static str,
    path: &'static str,
}

fn identify(req: &Request) -> Identity {
    Identity::new(req.user, req.path, "ORDERS-PER-MINUTE")
}

#[tokio::test]
async fn layer_composes_with_service_builder() {
    let clock = ManualClock::new(1_699_999_990);
    let engine = QuotaEngine::new(InMemoryCounterStore::with_clock(clock.clone()))
        .with_clock(clock.clone())
        .with_policies(
            PolicyRegistry::default().with_policy("ORDERS-PER-MINUTE", Policy::new(60, 3).unwrap()),
        );

    let svc = ServiceBuilder::new()
        .layer(QuotaLayer::new(engine, identify))
        .service(service_fn(|req: Request| async move {
            Ok::<_, std::io::Error>(format!("ok {}", req.path))
        }));

    let req = Request { user: "u1", path: "/api/orders" };
    for _ in 0..3 {
        assert_eq!(svc.clone().oneshot(req.clone()).await.unwrap(), "ok /api/orders");
    }
    match svc.clone().oneshot(req.clone()).await {
        Err(AdmissionError::Denied { remaining, reset_in }) => {
            assert_eq!(remaining, 0);
            assert_eq!(reset_in, Duration::from_secs(50));
        }
        other => panic!("expected denial, got {other:?}"),
    }

    clock.advance(50);
    assert!(svc.oneshot(req).await.is_ok());
}

#[tokio::test]
async fn resource_path_does_not_split_the_budget() {
    let engine = QuotaEngine::new(InMemoryCounterStore::new())
        .with_policies(PolicyRegistry::new(Policy::new(60, 2).unwrap()));
    let svc = ServiceBuilder::new()
        .layer(QuotaLayer::new(engine, identify))
        .service(service_fn(|_req: Request| async { Ok::<_, std::io::Error>(()) }));

    assert!(svc.clone().oneshot(Request { user: "u1", path: "/a" }).await.is_ok());
    assert!(svc.clone().oneshot(Request { user: "u1", path: "/b" }).await.is_ok());
    let err = svc.oneshot(Request { user: "u1", path: "/c" }).await.unwrap_err();
    assert!(err.is_denied());
}

#[tokio::test]
async fn inner_errors_pass_through_after_charging() {
    let engine = QuotaEngine::new(InMemoryCounterStore::new())
        .with_policies(PolicyRegistry::new(Policy::new(60, 5).unwrap()));
    let probe = engine.clone();
    let svc = ServiceBuilder::new().layer(QuotaLayer::new(engine, identify)).service(service_fn(
        |_req: Request| async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "backend down"))
        },
    ));

    let req = Request { user: "u1", path: "/api/orders" };
    let err = svc.oneshot(req.clone()).await.unwrap_err();
    assert!(!err.is_denied());
    assert_eq!(err.retry_after(), None);
    let inner = err.into_inner().expect("inner error");
    assert_eq!(inner.to_string(), "backend down");

    assert_eq!(probe.peek(&identify(&req)).await.remaining, 4);
}

#[derive(Debug)]
struct RefusingStore;

#[async_trait]
impl CounterStore for RefusingStore {
    type Error = std::io::Error;

    async fn get(&self, _key: &str) -> Result<Option<u64>, Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"))
    }

    async fn increment_within(
        &self,
        _key: &str,
        _max: u64,
        _ttl: Duration,
    ) -> Result<Increment, Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused"))
    }
}

#[tokio::test]
async fn unreachable_store_denies_without_calling_inner() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let svc = ServiceBuilder::new()
        .layer(QuotaLayer::new(QuotaEngine::new(RefusingStore), identify))
        .service(service_fn(move |_req: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, std::io::Error>(()) }
        }));

    let err = svc.oneshot(Request { user: "u1", path: "/api/orders" }).await.unwrap_err();
    match err {
        AdmissionError::Denied { remaining, reset_in } => {
            assert_eq!(remaining, 0);
            assert_eq!(reset_in, Duration::from_secs(60));
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
