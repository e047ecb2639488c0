use chrono::{TimeZone, Utc};
use job_safety_audit::{HistoryFilter, RetryAttempt, RetryAuditLogger};
use job_safety_core::{Clock, FailureKind, InMemoryJob, JobHandle, ManualClock};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

fn before_midnight() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 0).unwrap(),
    ))
}

#[test]
fn trail_spans_daily_shards() {
    let dir = tempfile::tempdir().unwrap();
    let clock = before_midnight();
    let logger = RetryAuditLogger::builder()
        .dir(dir.path())
        .clock(clock.clone())
        .build()
        .unwrap();

    let mut job = InMemoryJob::new("job-1", "place_order").with_arg("BTCUSDT");
    job.meta_mut().set_retry_attempts(1);
    logger.log_attempt(
        &job,
        RetryAttempt::new("exchange timeout", FailureKind::Timeout).failed("timed out after 30s"),
    );

    clock.advance(Duration::from_secs(120));
    job.meta_mut().set_retry_attempts(2);
    logger.log_attempt(
        &job,
        RetryAttempt::new("exchange timeout", FailureKind::Timeout)
            .initiator("alice")
            .succeeded(),
    );
    let other = InMemoryJob::new("job-2", "sync_balances");
    logger.log_dry_run(&other, "checking before requeue", FailureKind::RateLimit, "bob");

    assert_eq!(logger.flush().unwrap(), 3);
    assert_eq!(logger.pending(), 0);

    let day_one = logger.shard_path(Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap().date_naive());
    let day_two = logger.shard_path(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap().date_naive());
    assert!(day_one.ends_with("retry_audit_20260314.jsonl"));
    assert_eq!(fs::read_to_string(&day_one).unwrap().lines().count(), 1);
    assert_eq!(fs::read_to_string(&day_two).unwrap().lines().count(), 2);

    let history = logger.history(&HistoryFilter::all().job("job-1")).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].attempt_number, 1);
    assert_eq!(history[0].initiator, "system");
    assert_eq!(history[0].success, Some(false));
    assert_eq!(history[0].error_message.as_deref(), Some("timed out after 30s"));
    assert_eq!(history[1].initiator, "alice");
    assert_eq!(history[1].args_repr, job.args_repr());

    let second_day = logger
        .history(&HistoryFilter::all().since(Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap()))
        .unwrap();
    assert_eq!(second_day.len(), 2);

    let stats = logger.stats().unwrap();
    assert_eq!(stats.total_retries, 3);
    assert_eq!(stats.successful_retries, 1);
    assert_eq!(stats.failed_retries, 1);
    assert_eq!(stats.dry_runs, 1);
    assert_eq!(stats.unique_jobs, 2);
    assert_eq!(stats.failure_kinds.get(&FailureKind::Timeout), Some(&2));
}

#[test]
fn unreadable_lines_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let clock = before_midnight();
    let logger = RetryAuditLogger::builder()
        .dir(dir.path())
        .clock(clock.clone())
        .build()
        .unwrap();

    let job = InMemoryJob::new("job-1", "place_order");
    logger.log_attempt(&job, RetryAttempt::new("first", FailureKind::NetworkError));
    logger.flush().unwrap();

    let shard = logger.shard_path(clock.now().date_naive());
    let mut contents = fs::read_to_string(&shard).unwrap();
    contents.push_str("{not json\n\n");
    fs::write(&shard, contents).unwrap();

    logger.log_attempt(&job, RetryAttempt::new("second", FailureKind::NetworkError));
    logger.flush().unwrap();

    let reasons: Vec<String> = logger
        .history(&HistoryFilter::all())
        .unwrap()
        .into_iter()
        .map(|r| r.reason)
        .collect();
    assert_eq!(reasons, vec!["first", "second"]);
}

#[test]
fn full_buffer_flushes_itself_and_drop_flushes_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let clock = before_midnight();
    let path = {
        let logger = RetryAuditLogger::builder()
            .dir(dir.path())
            .buffer_capacity(2)
            .clock(clock.clone())
            .build()
            .unwrap();
        let job = InMemoryJob::new("job-1", "place_order");

        logger.log_attempt(&job, RetryAttempt::new("a", FailureKind::Unknown));
        assert_eq!(logger.pending(), 1);
        logger.log_attempt(&job, RetryAttempt::new("b", FailureKind::Unknown));
        assert_eq!(logger.pending(), 0);
        logger.log_attempt(&job, RetryAttempt::new("c", FailureKind::Unknown));
        logger.shard_path(clock.now().date_naive())
    };

    assert_eq!(fs::read_to_string(path).unwrap().lines().count(), 3);
}
