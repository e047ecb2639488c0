use job_safety_core::{BlockReason, InMemoryJob, JobHandle, ManualClock, RetryDecision};
use job_safety_retry::{RetryLimits, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

fn policy(clock: Arc<ManualClock>, limits: RetryLimits) -> RetryPolicy {
    RetryPolicy::builder().limits(limits).clock(clock).build()
}

fn exponential() -> RetryLimits {
    RetryLimits {
        max_retries: 6,
        cooldown: Duration::from_secs(10),
        exponential_backoff: true,
        max_cooldown: Duration::from_secs(300),
    }
}

#[tokio::test]
async fn each_attempt_waits_out_a_doubled_cooldown() {
    let clock = Arc::new(ManualClock::starting_now());
    let policy = policy(clock.clone(), exponential());
    let mut job = InMemoryJob::new("job-1", "place_order");

    assert_eq!(policy.can_retry(&job), RetryDecision::Allowed);

    let mut waits = Vec::new();
    for _ in 0..6 {
        policy.record_attempt(&mut job).await.unwrap();
        let attempts = job.meta().retry_attempts();
        let expected = policy.cooldown_for(attempts);
        waits.push(expected.as_secs());

        if attempts == 6 {
            break;
        }
        clock.advance(expected - Duration::from_secs(1));
        match policy.can_retry(&job) {
            RetryDecision::Blocked(BlockReason::Cooldown { remaining }) => {
                assert_eq!(remaining, Duration::from_secs(1));
            }
            other => panic!("expected cooldown after attempt {attempts}, got {other:?}"),
        }
        clock.advance(Duration::from_secs(1));
        assert!(policy.can_retry(&job).is_allowed());
    }

    assert_eq!(waits, vec![20, 40, 80, 160, 300, 300]);
    assert_eq!(
        policy.can_retry(&job),
        RetryDecision::Blocked(BlockReason::MaxAttempts { max: 6 })
    );
}

#[tokio::test]
async fn flat_cooldown_does_not_grow() {
    let clock = Arc::new(ManualClock::starting_now());
    let limits = RetryLimits {
        exponential_backoff: false,
        ..exponential()
    };
    let policy = policy(clock.clone(), limits);
    let mut job = InMemoryJob::new("job-1", "sync_balances");

    for _ in 0..3 {
        policy.record_attempt(&mut job).await.unwrap();
        let status = policy.status(&job);
        assert_eq!(status.cooldown, Duration::from_secs(10));
        assert_eq!(
            status.next_retry_at,
            status.last_retry_at.map(|at| at + chrono::Duration::seconds(10))
        );
        clock.advance(Duration::from_secs(10));
    }
}

#[tokio::test]
async fn operator_extension_outlives_the_reset() {
    let clock = Arc::new(ManualClock::starting_now());
    let policy = policy(clock.clone(), RetryLimits::default());
    let mut job = InMemoryJob::new("job-9", "settle_trades");

    for _ in 0..3 {
        policy.record_attempt(&mut job).await.unwrap();
    }
    clock.advance(Duration::from_secs(3600));
    assert!(!policy.can_retry(&job).is_allowed());

    assert_eq!(policy.extend_retry_limit(&mut job, 2).await.unwrap(), 5);
    assert!(policy.can_retry(&job).is_allowed());
    assert_eq!(job.committed_meta().custom_max_retries(), Some(5));

    let first_failed = job.meta().first_failed_at();
    policy.record_attempt(&mut job).await.unwrap();
    assert_eq!(job.meta().first_failed_at(), first_failed);

    policy.reset_metadata(&mut job).await.unwrap();
    let meta = job.committed_meta();
    assert_eq!(meta.retry_attempts(), 0);
    assert_eq!(meta.last_retry_at(), None);
    assert_eq!(meta.first_failed_at(), None);
    assert_eq!(policy.effective_max_retries(&job), 5);
}
