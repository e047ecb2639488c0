use job_safety::core::{
    BlockReason, FailureKind, InMemoryJob, JobHandle, ManualClock, MemoryCoordinator,
    SharedCoordinator,
};
use job_safety::idempotency::{order_entity_id, EffectKind};
use job_safety::retry::RetryLimits;
use job_safety::{RetrySupervisor, SupervisorError, LAST_FAILURE_KIND};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn quick_limits() -> RetryLimits {
    RetryLimits {
        max_retries: 3,
        cooldown: Duration::from_secs(30),
        exponential_backoff: false,
        max_cooldown: Duration::from_secs(30),
    }
}

fn worker(store: &SharedCoordinator, clock: &Arc<ManualClock>, name: &str) -> RetrySupervisor {
    RetrySupervisor::builder(Arc::clone(store))
        .clock(clock.clone())
        .limits(quick_limits())
        .initiator(name)
        .build()
}

#[tokio::test]
async fn retried_order_is_placed_once() {
    let clock = Arc::new(ManualClock::starting_now());
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
    let supervisor = worker(&store, &clock, "worker-1");
    let guard = supervisor.side_effects();
    let placed = Arc::new(AtomicU32::new(0));
    let mut job = InMemoryJob::new("job-42", "place_order");
    let entity = order_entity_id("BTCUSDT", "buy", 0.25, Some(64000.0));

    // the order goes through, then the confirmation step times out
    let first = supervisor
        .run(&mut job, "orders", || async {
            guard
                .execute_once(&EffectKind::OrderPlacement, &entity, || async {
                    placed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("order-1001".to_string())
                })
                .await
                .map_err(|e| e.to_string())?;
            Err::<String, _>("TimeoutError: confirmation timed out".to_string())
        })
        .await;
    assert!(matches!(first, Err(SupervisorError::Job(_))));
    assert_eq!(
        job.committed_meta().get(LAST_FAILURE_KIND).and_then(|v| v.as_str()),
        Some(FailureKind::Timeout.as_str())
    );

    clock.advance(Duration::from_secs(30));
    let order_id = supervisor
        .run(&mut job, "orders", || async {
            let outcome = guard
                .execute_once(&EffectKind::OrderPlacement, &entity, || async {
                    placed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>("order-1002".to_string())
                })
                .await
                .map_err(|e| e.to_string())?;
            assert!(!outcome.executed);
            outcome.result.ok_or_else(|| "result expired".to_string())
        })
        .await
        .unwrap();

    assert_eq!(order_id, "order-1001");
    assert_eq!(placed.load(Ordering::SeqCst), 1);
    assert_eq!(job.meta().retry_attempts(), 0);
    assert!(job.meta().get(LAST_FAILURE_KIND).is_none());
}

#[tokio::test]
async fn an_outage_seen_by_one_worker_blocks_the_others() {
    let clock = Arc::new(ManualClock::starting_now());
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
    let first = worker(&store, &clock, "worker-1");
    let second = worker(&store, &clock, "worker-2");

    for n in 0..10 {
        let mut job = InMemoryJob::new(format!("sync-{n}"), "sync_balances");
        let result = first
            .run(&mut job, "balances", || async {
                Err::<(), _>("ServiceUnavailable: 503 from exchange")
            })
            .await;
        assert!(matches!(result, Err(SupervisorError::Job(_))));
    }

    let mut fresh = InMemoryJob::new("sync-10", "sync_balances");
    let ran = AtomicU32::new(0);
    let err = second
        .run(&mut fresh, "balances", || async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        })
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Circuit breaker open for balances, manual override required"
    );
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(fresh.meta().retry_attempts(), 0);

    second
        .breakers()
        .breaker("balances")
        .set_manual_override("ops", "exchange back")
        .await
        .unwrap();
    second
        .run(&mut fresh, "balances", || async { Ok::<_, String>(()) })
        .await
        .unwrap();

    let decision = first.check(&fresh, "balances").await.unwrap();
    assert!(decision.is_allowed());

    let metrics = first.metrics().unwrap();
    let balances = metrics.job_type_metrics("balances").await.unwrap();
    assert_eq!(balances.failure_count, 10);
    assert_eq!(balances.success_count, 1);
    assert_eq!(metrics.block_reasons().await.unwrap().get("circuit_open"), Some(&1));
}

#[tokio::test]
async fn permanent_failure_is_never_retried() {
    let clock = Arc::new(ManualClock::starting_now());
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
    let supervisor = worker(&store, &clock, "worker-1");
    let mut job = InMemoryJob::new("job-7", "place_order");

    supervisor.begin_attempt(&mut job, "orders").await.unwrap();
    let completion = supervisor
        .complete(
            &mut job,
            "orders",
            job_safety::AttemptOutcome::Failed("Insufficient balance for order"),
        )
        .await
        .unwrap();

    assert!(completion.is_final());
    assert_eq!(completion.failure_kind, Some(FailureKind::InsufficientBalance));
    assert_eq!(
        completion.next.as_ref().and_then(|d| d.reason()),
        Some(&BlockReason::NonRetryable {
            kind: FailureKind::InsufficientBalance
        })
    );
    let window = completion.window.unwrap();
    assert!(!window.success);
    assert_eq!(window.attempt_count, 1);
}
