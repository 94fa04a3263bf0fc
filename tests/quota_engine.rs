use async_trait::async_trait;
use gatekeeper::{
    CounterStore, Identity, InMemoryCounterStore, Increment, ManualClock, Mode, Outcome, Policy,
    PolicyRegistry, QuotaEngine,
};
use std::sync::Arc;
use std::time::Duration;

const START: u64 = 1_700_000_000;

fn engine_at(clock: &ManualClock) -> QuotaEngine<InMemoryCounterStore> {
    QuotaEngine::new(InMemoryCounterStore::with_clock(clock.clone())).with_clock(clock.clone())
}

#[tokio::test]
async fn sequential_consumes_count_down_to_zero_then_deny() {
    let clock = ManualClock::new(START);
    let engine = engine_at(&clock);
    let caller = Identity::new("u1", "/api/x", "P");

    let mut remaining = Vec::new();
    for _ in 0..10 {
        let outcome = engine.consume(&caller).await;
        assert!(outcome.allowed);
        remaining.push(outcome.remaining);
    }
    assert_eq!(remaining, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);

    let eleventh = engine.consume(&caller).await;
    assert!(!eleventh.allowed);
    assert_eq!(eleventh.remaining, 0);
}

#[tokio::test]
async fn peek_reflects_consumes_and_is_idempotent() {
    let clock = ManualClock::new(START);
    let engine = engine_at(&clock);
    let caller = Identity::new("u1", "/api/x", "P");

    for _ in 0..3 {
        engine.consume(&caller).await;
    }
    let first = engine.peek(&caller).await;
    let second = engine.peek(&caller).await;
    assert!(first.allowed);
    assert_eq!(first.remaining, 7);
    assert_eq!(first, second);
}

#[tokio::test]
async fn peek_denies_once_budget_is_spent() {
    let clock = ManualClock::new(START);
    let engine = engine_at(&clock)
        .with_policies(PolicyRegistry::new(Policy::new(60, 2).unwrap()));
    let caller = Identity::new("u1", "/api/x", "P");

    engine.consume(&caller).await;
    engine.consume(&caller).await;
    let peek = engine.peek(&caller).await;
    assert!(!peek.allowed);
    assert_eq!(peek.remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumes_never_over_admit() {
    let engine = QuotaEngine::new(InMemoryCounterStore::new());
    let caller = Identity::new("racer", "/api/x", "P");

    let barrier = Arc::new(tokio::sync::Barrier::new(10));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        let caller = caller.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.consume(&caller).await
        }));
    }

    let mut remaining = Vec::new();
    for handle in handles {
        let outcome = handle.await.expect("task panicked");
        assert!(outcome.allowed);
        remaining.push(outcome.remaining);
    }
    remaining.sort_unstable();
    assert_eq!(remaining, (0..10).collect::<Vec<u64>>());

    let eleventh = engine.consume(&caller).await;
    assert!(!eleventh.allowed);
    assert_eq!(eleventh.remaining, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversubscribed_burst_admits_exactly_max() {
    let engine = QuotaEngine::new(InMemoryCounterStore::new());
    let caller = Identity::new("burst", "/api/x", "P");

    let outcomes = futures::future::join_all((0..50).map(|_| {
        let engine = engine.clone();
        let caller = caller.clone();
        tokio::spawn(async move { engine.consume(&caller).await })
    }))
    .await;

    let admitted = outcomes.into_iter().map(|r| r.expect("task panicked")).filter(|o| o.allowed);
    assert_eq!(admitted.count(), 10);
}

#[tokio::test]
async fn subjects_under_one_policy_are_isolated() {
    let engine = QuotaEngine::new(InMemoryCounterStore::new());
    let alice = Identity::new("alice", "/api/shared", "SHARED-LIMIT");
    let bob = Identity::new("bob", "/api/shared", "SHARED-LIMIT");

    for _ in 0..10 {
        engine.consume(&alice).await;
    }
    assert!(!engine.consume(&alice).await.allowed);

    let outcome = engine.consume(&bob).await;
    assert!(outcome.allowed);
    assert_eq!(outcome.remaining, 9);
}

#[tokio::test]
async fn policies_for_one_subject_are_isolated() {
    let engine = QuotaEngine::new(InMemoryCounterStore::new());
    let reads = Identity::new("test-user", "/api/read", "READ-LIMIT");
    let writes = Identity::new("test-user", "/api/write", "WRITE-LIMIT");

    for _ in 0..10 {
        engine.consume(&reads).await;
    }
    assert!(!engine.consume(&reads).await.allowed);
    assert_eq!(engine.peek(&writes).await.remaining, 10);
    assert!(engine.consume(&writes).await.allowed);
}

#[tokio::test]
async fn policies_enforce_their_own_limits() {
    let registry = PolicyRegistry::default()
        .with_policy("ORDERS-PER-MINUTE", Policy::new(60, 3).unwrap())
        .with_policy("EXPORTS-PER-HOUR", Policy::new(3600, 1).unwrap());
    let clock = ManualClock::new(START);
    let engine = engine_at(&clock).with_policies(registry);

    let orders = Identity::new("u", "/api/orders", "ORDERS-PER-MINUTE");
    let exports = Identity::new("u", "/api/exports", "EXPORTS-PER-HOUR");

    assert_eq!(engine.consume(&orders).await.remaining, 2);
    let export = engine.consume(&exports).await;
    assert_eq!(export.remaining, 0);
    assert!(export.reset_in > Duration::from_secs(60));
    assert!(!engine.consume(&exports).await.allowed);
}

#[tokio::test]
async fn reset_in_stays_within_window() {
    let clock = ManualClock::new(START);
    let engine = engine_at(&clock);
    let caller = Identity::new("u1", "/api/x", "P");

    for step in 0..130 {
        clock.set(START + step);
        for mode in [Mode::Peek, Mode::Consume] {
            let outcome = engine.evaluate(&caller, mode).await;
            assert!(outcome.reset_in > Duration::ZERO, "step {step}: {outcome:?}");
            assert!(outcome.reset_in <= Duration::from_secs(60), "step {step}: {outcome:?}");
        }
    }
}

#[tokio::test]
async fn next_window_starts_fresh() {
    let clock = ManualClock::new(START);
    let engine = engine_at(&clock);
    let caller = Identity::new("u1", "/api/x", "P");

    for _ in 0..10 {
        engine.consume(&caller).await;
    }
    let denied = engine.consume(&caller).await;
    assert!(!denied.allowed);

    clock.advance(denied.reset_in.as_secs());
    let fresh = engine.consume(&caller).await;
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 9);
    assert_eq!(fresh.reset_in, Duration::from_secs(60));
}

#[tokio::test]
async fn policy_updates_apply_to_running_engine() {
    let registry = PolicyRegistry::default();
    let engine = QuotaEngine::new(InMemoryCounterStore::new()).with_policies(registry.clone());
    let caller = Identity::new("u1", "/api/x", "LIVE");

    assert_eq!(engine.peek(&caller).await.remaining, 10);
    registry.insert("LIVE", Policy::new(60, 500).unwrap());
    assert_eq!(engine.peek(&caller).await.remaining, 500);
}

#[derive(Debug)]
struct Unreachable;

#[async_trait]
impl CounterStore for Unreachable {
    type Error = std::io::Error;

    async fn get(&self, _key: &str) -> Result<Option<u64>, Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "store timeout"))
    }

    async fn increment_within(
        &self,
        _key: &str,
        _max: u64,
        _ttl: Duration,
    ) -> Result<Increment, Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "store timeout"))
    }
}

#[tokio::test]
async fn store_failure_fails_open_for_peek_and_closed_for_consume() {
    let engine = QuotaEngine::new(Unreachable);
    let caller = Identity::new("user123", "/api/orders", "ORDERS-PER-MINUTE");

    assert_eq!(engine.peek(&caller).await, Outcome::new(true, 10, Duration::from_secs(60)));
    assert_eq!(engine.consume(&caller).await, Outcome::new(false, 0, Duration::from_secs(60)));
}
