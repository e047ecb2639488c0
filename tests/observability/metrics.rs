use job_safety_core::{ManualClock, MemoryCoordinator, SharedCoordinator};
use job_safety_metrics::RetryMetrics;
use std::sync::Arc;
use std::time::Duration;

fn shared_metrics() -> (Arc<ManualClock>, SharedCoordinator) {
    let clock = Arc::new(ManualClock::starting_now());
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
    (clock, store)
}

#[tokio::test]
async fn workers_aggregate_into_one_view() {
    let (clock, store) = shared_metrics();
    let worker_a = RetryMetrics::builder(Arc::clone(&store)).clock(clock.clone()).build();
    let worker_b = RetryMetrics::builder(Arc::clone(&store)).clock(clock.clone()).build();

    worker_a.record_attempt("place_order", 1).await;
    worker_a.record_failure("place_order").await;
    clock.advance(Duration::from_secs(30));
    worker_b.record_attempt("place_order", 2).await;
    worker_b.record_success("place_order").await;
    worker_b.record_attempt("sync_balances", 1).await;
    worker_b.record_success("sync_balances").await;
    worker_a.record_blocked("place_order", "circuit_open").await;

    let snapshot = worker_a.snapshot(Duration::from_secs(60)).await.unwrap();
    assert_eq!(snapshot.total_retries, 3);
    assert_eq!(snapshot.total_successes, 2);
    assert_eq!(snapshot.total_failures, 1);
    assert_eq!(snapshot.total_blocks, 1);
    assert!((snapshot.retry_rate_per_minute - 3.0).abs() < 1e-9);
    assert!((snapshot.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert!((snapshot.avg_attempts - 4.0 / 3.0).abs() < 1e-9);
    assert!((snapshot.block_rate - 0.25).abs() < 1e-9);
    assert_eq!(
        snapshot.job_types.keys().collect::<Vec<_>>(),
        vec!["place_order", "sync_balances"]
    );
    assert_eq!(snapshot.job_types["place_order"].block_count, 1);

    // retries older than the window drop out of the rate only
    clock.advance(Duration::from_secs(120));
    assert_eq!(worker_b.retry_rate(Duration::from_secs(60)).await.unwrap(), 0.0);
    assert_eq!(worker_b.snapshot(Duration::from_secs(60)).await.unwrap().total_retries, 3);
}

#[tokio::test]
async fn prometheus_export_lists_every_series() {
    let (clock, store) = shared_metrics();
    let metrics = RetryMetrics::builder(store).clock(clock).build();

    metrics.record_attempt("place_order", 1).await;
    metrics.record_success("place_order").await;
    metrics.record_blocked("settle \"eu\"", "max_attempts").await;

    let text = metrics.export_prometheus().await.unwrap();
    for line in [
        "# TYPE retry_rate_per_minute gauge",
        "# TYPE retry_success_rate gauge",
        "retry_success_rate 1",
        "# TYPE retry_total_count counter",
        "retry_total_count 1",
        "retry_total_blocks 1",
        "retry_job_type_total{job_type=\"place_order\",event=\"success\"} 1",
        "retry_job_type_total{job_type=\"settle \\\"eu\\\"\",event=\"blocked\"} 1",
        "retry_block_reason_total{reason=\"max_attempts\"} 1",
    ] {
        assert!(text.lines().any(|l| l == line), "missing `{line}` in:\n{text}");
    }
}

#[tokio::test]
async fn reset_clears_everything() {
    let (clock, store) = shared_metrics();
    let metrics = RetryMetrics::builder(store).clock(clock).build();
    metrics.record_attempt("place_order", 1).await;
    metrics.record_blocked("place_order", "cooldown").await;

    metrics.reset().await.unwrap();

    let snapshot = metrics.snapshot(Duration::from_secs(3600)).await.unwrap();
    assert_eq!(snapshot.total_retries, 0);
    assert_eq!(snapshot.total_blocks, 0);
    assert!(snapshot.job_types.is_empty());
    assert!(snapshot.block_reasons.is_empty());
    assert_eq!(snapshot.avg_attempts, 0.0);
}
