//! Retry metrics regression tests

use super::helpers::*;
use job_safety_core::MemoryCoordinator;
use job_safety_metrics::RetryMetrics;
use serial_test::serial;
use std::sync::Arc;

#[tokio::test]
#[serial]
async fn retry_metrics_exist() {
    init_recorder();

    let metrics = RetryMetrics::new(Arc::new(MemoryCoordinator::new()));
    metrics.record_attempt("metrics_retry", 1).await;
    metrics.record_failure("metrics_retry").await;
    metrics.record_attempt("metrics_retry", 2).await;
    metrics.record_success("metrics_retry").await;
    metrics.record_blocked("metrics_retry", "max_attempts").await;

    let job_type = ("job_type", "metrics_retry");
    assert_eq!(counter_total("job_retry_attempts_total", &[job_type]), 2);
    assert_eq!(
        counter_total("job_retry_outcomes_total", &[job_type, ("outcome", "failure")]),
        1
    );
    assert_eq!(
        counter_total("job_retry_blocked_total", &[job_type, ("reason", "max_attempts")]),
        1
    );

    assert_counter_exists("job_retry_attempts_total");
    assert_metric_has_label("job_retry_attempts_total", "job_type", "metrics_retry");

    assert_counter_exists("job_retry_outcomes_total");
    assert_metric_has_label("job_retry_outcomes_total", "job_type", "metrics_retry");
    assert_metric_has_label("job_retry_outcomes_total", "outcome", "success");
    assert_metric_has_label("job_retry_outcomes_total", "outcome", "failure");

    assert_counter_exists("job_retry_blocked_total");
    assert_metric_has_label("job_retry_blocked_total", "reason", "max_attempts");
}
