use job_safety_core::{
    Alert, AlertKind, AlertSinks, FnListener, ManualClock, MemoryCoordinator, SharedCoordinator,
};
use job_safety_patterns::{
    Anomaly, AttemptBucket, RetryAnomalyDetector, RetryHistogram, RetryWindowTracker,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn capture_alerts() -> (AlertSinks, Arc<Mutex<Vec<Alert>>>) {
    let alerts = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&alerts);
    let mut sinks = AlertSinks::new();
    sinks.add(FnListener::new(move |alert: &Alert| {
        captured.lock().unwrap().push(alert.clone());
    }));
    (sinks, alerts)
}

#[tokio::test]
async fn window_survives_a_worker_restart() {
    let clock = Arc::new(ManualClock::starting_now());
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
    let (sinks, alerts) = capture_alerts();
    let detector = RetryAnomalyDetector::builder()
        .clock(clock.clone())
        .alert_sinks(sinks)
        .build();

    let started = {
        let before = RetryWindowTracker::builder(Arc::clone(&store))
            .clock(clock.clone())
            .build();
        before.increment_attempt("job-42").await;
        clock.advance(Duration::from_secs(600));
        before.increment_attempt("job-42").await;
        before.window("job-42").unwrap().start_time
    };

    let after = RetryWindowTracker::builder(Arc::clone(&store))
        .clock(clock.clone())
        .build();
    assert_eq!(after.recover().await.unwrap(), 1);
    assert_eq!(after.active_count(), 1);
    assert_eq!(after.increment_attempt("job-42").await, 3);

    clock.advance(Duration::from_secs(2 * 3600));
    let window = after.close_window("job-42", true).await.unwrap();
    let drift = (window.start_time - started).num_milliseconds().abs();
    assert!(drift <= 1, "start time drifted by {drift}ms");
    assert_eq!(window.attempt_count, 3);
    assert!(window.duration().unwrap() > Duration::from_secs(3600));

    let anomalies = detector.record_window(&window);
    assert_eq!(anomalies.len(), 1);
    assert!(matches!(anomalies[0], Anomaly::LongWindow { .. }));

    let alerts = alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::RetryAnomaly);
    assert_eq!(alerts[0].source, "job-42");
    assert!(alerts[0].message.starts_with("Long retry window: "));
    assert_eq!(alerts[0].details.get("attempts").map(String::as_str), Some("3"));

    // a third tracker finds nothing left to recover
    let later = RetryWindowTracker::builder(store).clock(clock.clone()).build();
    assert_eq!(later.recover().await.unwrap(), 0);
}

#[tokio::test]
async fn fleet_retry_profile() {
    let clock = Arc::new(ManualClock::starting_now());
    let store: SharedCoordinator = Arc::new(MemoryCoordinator::with_clock(clock.clone()));
    let tracker = RetryWindowTracker::builder(store).clock(clock.clone()).build();
    let (sinks, alerts) = capture_alerts();
    let detector = RetryAnomalyDetector::builder()
        .clock(clock.clone())
        .alert_sinks(sinks)
        .build();
    let mut histogram = RetryHistogram::new();

    // four first-try successes, five jobs needing 2..=6 attempts, one needing 12
    let attempts = [1, 1, 1, 1, 2, 3, 4, 5, 6, 12];
    let mut flagged = Vec::new();
    for (n, count) in attempts.iter().enumerate() {
        let job_id = format!("job-{n}");
        for _ in 0..*count {
            tracker.increment_attempt(&job_id).await;
            clock.advance(Duration::from_secs(10));
        }
        let window = tracker.close_window(&job_id, true).await.unwrap();
        histogram.record_window(&window);
        flagged.extend(detector.record_window(&window));
    }

    assert_eq!(tracker.active_count(), 0);
    assert_eq!(histogram.total(), 10);
    assert_eq!(histogram.count(AttemptBucket::One), 4);
    assert_eq!(histogram.count(AttemptBucket::FourToFive), 2);
    assert_eq!(histogram.count(AttemptBucket::SixToTen), 1);
    assert_eq!(histogram.count(AttemptBucket::ElevenToTwenty), 1);
    let one = histogram
        .percentages()
        .into_iter()
        .find(|(bucket, _)| *bucket == AttemptBucket::One)
        .map(|(_, pct)| pct)
        .unwrap();
    assert!((one - 40.0).abs() < 1e-9);

    // 6 of 10 jobs retried: over the 50% ratio once enough jobs were seen
    assert_eq!(
        flagged.iter().map(Anomaly::as_str).collect::<Vec<_>>(),
        vec!["excessive_attempts", "high_retry_rate"]
    );
    let stats = detector.stats();
    assert_eq!(stats.total_jobs, 10);
    assert_eq!(stats.retried_jobs, 6);
    assert_eq!(stats.excessive_attempts, 1);
    assert_eq!(alerts.lock().unwrap().len(), 2);
}
