//! Circuit breaker metrics regression tests

use super::helpers::*;
use job_safety_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use job_safety_core::{AlertSinks, MemoryCoordinator};
use serial_test::serial;
use std::sync::Arc;

#[tokio::test]
#[serial]
async fn circuitbreaker_metrics_exist() {
    init_recorder();

    let breaker = CircuitBreaker::new(
        Arc::new(MemoryCoordinator::new()),
        "metrics_cb",
        CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .alert_sinks(AlertSinks::new())
            .build(),
    );

    // open, get rejected, trial, close
    breaker.record_failure().await.unwrap();
    breaker.record_failure().await.unwrap();
    assert!(!breaker.can_retry().await.unwrap().is_allowed());
    breaker.set_manual_override("ops", "trial").await.unwrap();
    breaker.record_success().await.unwrap();

    let job_type = ("job_type", "metrics_cb");
    assert_eq!(
        counter_total("job_circuit_transitions_total", &[job_type, ("from", "closed"), ("to", "open")]),
        1
    );
    assert_eq!(counter_total("job_circuit_rejections_total", &[job_type]), 1);
    // closed again after the trial succeeded
    assert_eq!(gauge_value("job_circuit_state", &[job_type]), Some(0.0));

    assert_counter_exists("job_circuit_transitions_total");
    assert_metric_has_label("job_circuit_transitions_total", "job_type", "metrics_cb");
    assert_metric_has_label("job_circuit_transitions_total", "from", "closed");
    assert_metric_has_label("job_circuit_transitions_total", "to", "open");
    assert_metric_has_label("job_circuit_transitions_total", "to", "half_open");
    assert_metric_has_label("job_circuit_transitions_total", "from", "half_open");

    assert_counter_exists("job_circuit_rejections_total");
    assert_metric_has_label("job_circuit_rejections_total", "job_type", "metrics_cb");

    assert_gauge_exists("job_circuit_state");
    assert_metric_has_label("job_circuit_state", "job_type", "metrics_cb");
}
