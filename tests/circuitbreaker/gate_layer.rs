use job_safety_circuitbreaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitGateError, CircuitGateLayer, CircuitState,
};
use job_safety_core::{AlertSinks, MemoryCoordinator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};

#[derive(Debug, PartialEq)]
struct ExchangeDown;

fn breaker(threshold: u64) -> Arc<CircuitBreaker> {
    Arc::new(CircuitBreaker::new(
        Arc::new(MemoryCoordinator::new()),
        "settle_trades",
        CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .alert_sinks(AlertSinks::new())
            .build(),
    ))
}

#[tokio::test]
async fn gate_stops_calling_a_failing_job_runner() {
    let breaker = breaker(3);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let service = ServiceBuilder::new()
        .layer(CircuitGateLayer::new(Arc::clone(&breaker)))
        .service(service_fn(move |trade_id: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if trade_id > 0 {
                    Err(ExchangeDown)
                } else {
                    Ok(trade_id)
                }
            }
        }));

    for id in 1..=3 {
        let err = service.clone().oneshot(id).await.unwrap_err();
        assert!(matches!(err, CircuitGateError::Inner(ExchangeDown)));
    }
    assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);

    for id in 4..=10 {
        let err = service.clone().oneshot(id).await.unwrap_err();
        assert!(err.is_circuit_open());
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    breaker.set_manual_override("ops", "trial").await.unwrap();
    assert_eq!(service.clone().oneshot(0).await.unwrap(), 0);
    assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn successes_leave_a_closed_gate_closed() {
    let breaker = breaker(1);
    let service = CircuitGateLayer::new(Arc::clone(&breaker))
        .layer(service_fn(|n: u32| async move { Ok::<_, ExchangeDown>(n + 1) }));

    for n in 0..20 {
        assert_eq!(service.clone().oneshot(n).await.unwrap(), n + 1);
    }
    assert_eq!(breaker.state().await.unwrap(), CircuitState::Closed);
    assert_eq!(breaker.failure_count().await.unwrap(), 0);
}
