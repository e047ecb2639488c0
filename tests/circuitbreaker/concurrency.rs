use futures::future::join_all;
use job_safety_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
use job_safety_core::{AlertSinks, MemoryCoordinator, SharedCoordinator};
use std::sync::Arc;

fn quiet_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .alert_sinks(AlertSinks::new())
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_share_one_circuit_per_job_type() {
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::new());
    let config = Arc::new(quiet_config());
    let workers: Vec<Arc<CircuitBreakerManager>> = (0..4)
        .map(|_| {
            Arc::new(CircuitBreakerManager::with_config(
                Arc::clone(&store),
                Arc::clone(&config),
            ))
        })
        .collect();

    let tasks = workers.iter().map(|manager| {
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            let breaker = manager.breaker("sync_balances");
            for _ in 0..5 {
                breaker.record_failure().await.unwrap();
            }
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    for manager in &workers {
        let breaker = manager.breaker("sync_balances");
        assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
        assert_eq!(breaker.failure_count().await.unwrap(), 20);
    }

    // one operator override reaches every worker
    workers[0]
        .breaker("sync_balances")
        .set_manual_override("ops", "upstream fixed")
        .await
        .unwrap();
    for manager in &workers {
        assert!(manager
            .breaker("sync_balances")
            .can_retry()
            .await
            .unwrap()
            .is_allowed());
    }
}

#[tokio::test]
async fn manager_caches_breakers_and_reports_statuses() {
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::new());
    let manager = CircuitBreakerManager::with_config(store, quiet_config());

    let first = manager.breaker("place_order");
    let again = manager.breaker("place_order");
    assert!(Arc::ptr_eq(&first, &again));
    manager.breaker("fetch_prices");

    assert_eq!(manager.job_types(), vec!["fetch_prices", "place_order"]);

    for _ in 0..10 {
        first.record_failure().await.unwrap();
    }
    let statuses = manager.statuses().await.unwrap();
    assert_eq!(statuses["place_order"].state, CircuitState::Open);
    assert_eq!(statuses["fetch_prices"].state, CircuitState::Closed);
    assert!(statuses["fetch_prices"].can_retry);
}
