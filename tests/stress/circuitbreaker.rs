//! Circuit breaker stress tests

use futures::future::join_all;
use job_safety_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
use job_safety_core::{AlertSinks, MemoryCoordinator, SharedCoordinator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::init_tracing;

/// Test: failures from many tasks across many job types
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_concurrent_failures_many_job_types() {
    init_tracing();
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::new());
    let manager = Arc::new(CircuitBreakerManager::with_config(
        store,
        CircuitBreakerConfig::builder()
            .failure_threshold(50)
            .alert_sinks(AlertSinks::new())
            .build(),
    ));

    let start = Instant::now();
    let tasks = (0..2_000).map(|n| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let breaker = manager.breaker(&format!("job_type_{}", n % 20));
            breaker.record_failure().await.unwrap();
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }
    println!("2000 concurrent failures in {:?}", start.elapsed());

    let statuses = manager.statuses().await.unwrap();
    assert_eq!(statuses.len(), 20);
    for status in statuses.values() {
        assert_eq!(status.failure_count, 100);
        assert_eq!(status.state, CircuitState::Open);
    }
}

/// Test: checks racing an operator override never see an impossible state
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn stress_checks_during_recovery() {
    init_tracing();
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::new());
    let manager = Arc::new(CircuitBreakerManager::with_config(
        store,
        CircuitBreakerConfig::builder()
            .failure_threshold(5)
            .alert_sinks(AlertSinks::new())
            .build(),
    ));
    let breaker = manager.breaker("settle_trades");
    for _ in 0..5 {
        breaker.record_failure().await.unwrap();
    }

    let allowed = Arc::new(AtomicUsize::new(0));
    let checks = (0..5_000).map(|_| {
        let manager = Arc::clone(&manager);
        let allowed = Arc::clone(&allowed);
        tokio::spawn(async move {
            let decision = manager.breaker("settle_trades").can_retry().await.unwrap();
            if decision.is_allowed() {
                allowed.fetch_add(1, Ordering::Relaxed);
            }
        })
    });
    let operator = {
        let breaker = Arc::clone(&breaker);
        tokio::spawn(async move {
            breaker.set_manual_override("ops", "recovered").await.unwrap();
        })
    };

    for result in join_all(checks).await {
        result.unwrap();
    }
    operator.await.unwrap();

    println!("{} of 5000 checks allowed", allowed.load(Ordering::Relaxed));
    assert!(breaker.can_retry().await.unwrap().is_allowed());
    assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);
}
