use crate::snapshot::{ratio, JobTypeMetrics, MetricsSnapshot};
use job_safety_core::{system_clock, SharedClock, SharedCoordinator, StoreError};
#[cfg(feature = "metrics")]
use metrics::counter;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

const RETRY_FIELD: &str = "retry_count";
const SUCCESS_FIELD: &str = "success_count";
const FAILURE_FIELD: &str = "failure_count";
const BLOCK_FIELD: &str = "block_count";

struct Keys {
    retry_count: String,
    success_count: String,
    failure_count: String,
    block_count: String,
    attempts: String,
    retry_times: String,
    job_types: String,
    block_reasons: String,
    job_type_prefix: String,
}

impl Keys {
    fn new(ns: &str) -> Self {
        Self {
            retry_count: format!("{ns}:retry_count"),
            success_count: format!("{ns}:success_count"),
            failure_count: format!("{ns}:failure_count"),
            block_count: format!("{ns}:block_count"),
            attempts: format!("{ns}:attempts"),
            retry_times: format!("{ns}:retry_times"),
            job_types: format!("{ns}:job_types"),
            block_reasons: format!("{ns}:block_reasons"),
            job_type_prefix: format!("{ns}:job_type"),
        }
    }

    fn job_type(&self, job_type: &str) -> String {
        format!("{}:{}", self.job_type_prefix, job_type)
    }
}

/// Retry counters shared by every worker through the coordinator.
///
/// Recording is best effort: coordinator errors are logged and swallowed so
/// that metrics can never change a retry decision. Queries return errors.
///
/// Keys, under the `retry_metrics` namespace by default:
///
/// - `{ns}:retry_count`, `success_count`, `failure_count`, `block_count`: global counters
/// - `{ns}:attempts`: the attempt numbers of the most recent retries, capped
/// - `{ns}:retry_times`: sorted set of retry timestamps, pruned to the retention
/// - `{ns}:job_type:{job_type}`: hash of the four counters for one job type
/// - `{ns}:job_types`: hash listing every job type seen
/// - `{ns}:block_reasons`: hash of block counts per reason code
pub struct RetryMetrics {
    coordinator: SharedCoordinator,
    namespace: String,
    keys: Keys,
    attempts_cap: usize,
    retention: Duration,
    clock: SharedClock,
}

impl RetryMetrics {
    /// Creates metrics with the default settings.
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self::builder(coordinator).build()
    }

    pub fn builder(coordinator: SharedCoordinator) -> RetryMetricsBuilder {
        RetryMetricsBuilder::new(coordinator)
    }

    /// Records one retry attempt of `job_type`.
    pub async fn record_attempt(&self, job_type: &str, attempt_number: u32) {
        #[cfg(feature = "metrics")]
        counter!("job_retry_attempts_total", "job_type" => job_type.to_string()).increment(1);

        if let Err(e) = self.try_record_attempt(job_type, attempt_number).await {
            tracing::error!(job_type, error = %e, "failed to record retry attempt");
        }
    }

    /// Records a retry that succeeded.
    pub async fn record_success(&self, job_type: &str) {
        #[cfg(feature = "metrics")]
        counter!("job_retry_outcomes_total", "job_type" => job_type.to_string(), "outcome" => "success")
            .increment(1);

        if let Err(e) = self
            .bump(&self.keys.success_count, job_type, SUCCESS_FIELD)
            .await
        {
            tracing::error!(job_type, error = %e, "failed to record retry success");
        }
    }

    /// Records a retry that failed.
    pub async fn record_failure(&self, job_type: &str) {
        #[cfg(feature = "metrics")]
        counter!("job_retry_outcomes_total", "job_type" => job_type.to_string(), "outcome" => "failure")
            .increment(1);

        if let Err(e) = self
            .bump(&self.keys.failure_count, job_type, FAILURE_FIELD)
            .await
        {
            tracing::error!(job_type, error = %e, "failed to record retry failure");
        }
    }

    /// Records a retry that was refused, with a reason code such as
    /// `circuit_open` or `non_retryable`.
    pub async fn record_blocked(&self, job_type: &str, reason: &str) {
        #[cfg(feature = "metrics")]
        counter!(
            "job_retry_blocked_total",
            "job_type" => job_type.to_string(),
            "reason" => reason.to_string()
        )
        .increment(1);

        if let Err(e) = self.try_record_blocked(job_type, reason).await {
            tracing::error!(job_type, reason, error = %e, "failed to record blocked retry");
        }
    }

    /// Retries per minute over the trailing `window`.
    pub async fn retry_rate(&self, window: Duration) -> Result<f64, StoreError> {
        let minutes = window.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return Ok(0.0);
        }
        let now = self.clock.epoch_seconds();
        let count = self
            .coordinator
            .zcount(&self.keys.retry_times, now - window.as_secs_f64(), now)
            .await?;
        Ok(count as f64 / minutes)
    }

    /// Successes per retry.
    pub async fn success_rate(&self) -> Result<f64, StoreError> {
        let successes = self.counter(&self.keys.success_count).await?;
        let retries = self.counter(&self.keys.retry_count).await?;
        Ok(ratio(successes, retries))
    }

    /// Failures per retry.
    pub async fn failure_rate(&self) -> Result<f64, StoreError> {
        let failures = self.counter(&self.keys.failure_count).await?;
        let retries = self.counter(&self.keys.retry_count).await?;
        Ok(ratio(failures, retries))
    }

    /// Mean attempt number over the most recent retries.
    pub async fn avg_attempts(&self) -> Result<f64, StoreError> {
        let raw = self.coordinator.list_range(&self.keys.attempts, 0, -1).await?;
        if raw.is_empty() {
            return Ok(0.0);
        }
        let mut sum = 0u64;
        for value in &raw {
            sum += value
                .parse::<u64>()
                .map_err(|_| StoreError::corrupt(&self.keys.attempts, format!("not an attempt number: {value}")))?;
        }
        Ok(sum as f64 / raw.len() as f64)
    }

    /// Blocked retries as a share of all retry requests (made or blocked).
    pub async fn block_rate(&self) -> Result<f64, StoreError> {
        let blocks = self.counter(&self.keys.block_count).await?;
        let retries = self.counter(&self.keys.retry_count).await?;
        Ok(ratio(blocks, retries + blocks))
    }

    /// Counters of one job type. Unknown job types read as all zeros.
    pub async fn job_type_metrics(&self, job_type: &str) -> Result<JobTypeMetrics, StoreError> {
        let key = self.keys.job_type(job_type);
        let fields = self.coordinator.hget_all(&key).await?;
        let field = |name: &str| parse_count(&key, fields.get(name));
        Ok(JobTypeMetrics {
            job_type: job_type.to_string(),
            retry_count: field(RETRY_FIELD)?,
            success_count: field(SUCCESS_FIELD)?,
            failure_count: field(FAILURE_FIELD)?,
            block_count: field(BLOCK_FIELD)?,
        })
    }

    /// Every job type that recorded anything, sorted.
    pub async fn job_types(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .coordinator
            .hget_all(&self.keys.job_types)
            .await?
            .into_keys()
            .collect())
    }

    /// Block counts per reason code.
    pub async fn block_reasons(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let key = &self.keys.block_reasons;
        self.coordinator
            .hget_all(key)
            .await?
            .into_iter()
            .map(|(reason, count)| -> Result<(String, u64), StoreError> {
                let count = parse_count(key, Some(&count))?;
                Ok((reason, count))
            })
            .collect()
    }

    /// Reads every metric, with the retry rate over `rate_window`.
    pub async fn snapshot(&self, rate_window: Duration) -> Result<MetricsSnapshot, StoreError> {
        let total_retries = self.counter(&self.keys.retry_count).await?;
        let total_successes = self.counter(&self.keys.success_count).await?;
        let total_failures = self.counter(&self.keys.failure_count).await?;
        let total_blocks = self.counter(&self.keys.block_count).await?;

        let mut job_types = BTreeMap::new();
        for job_type in self.job_types().await? {
            let metrics = self.job_type_metrics(&job_type).await?;
            job_types.insert(job_type, metrics);
        }

        Ok(MetricsSnapshot {
            taken_at: self.clock.now(),
            rate_window,
            retry_rate_per_minute: self.retry_rate(rate_window).await?,
            success_rate: ratio(total_successes, total_retries),
            failure_rate: ratio(total_failures, total_retries),
            avg_attempts: self.avg_attempts().await?,
            block_rate: ratio(total_blocks, total_retries + total_blocks),
            total_retries,
            total_successes,
            total_failures,
            total_blocks,
            job_types,
            block_reasons: self.block_reasons().await?,
        })
    }

    /// Renders a snapshot in the Prometheus text exposition format.
    ///
    /// The retry rate uses a one hour window.
    pub async fn export_prometheus(&self) -> Result<String, StoreError> {
        let snapshot = self.snapshot(Duration::from_secs(3600)).await?;
        Ok(crate::prometheus::render(&snapshot))
    }

    /// Deletes every metric key.
    pub async fn reset(&self) -> Result<(), StoreError> {
        for job_type in self.job_types().await? {
            self.coordinator.delete(&self.keys.job_type(&job_type)).await?;
        }
        for key in [
            &self.keys.retry_count,
            &self.keys.success_count,
            &self.keys.failure_count,
            &self.keys.block_count,
            &self.keys.attempts,
            &self.keys.retry_times,
            &self.keys.job_types,
            &self.keys.block_reasons,
        ] {
            self.coordinator.delete(key).await?;
        }
        tracing::info!("retry metrics reset");
        Ok(())
    }

    async fn try_record_attempt(&self, job_type: &str, attempt_number: u32) -> Result<(), StoreError> {
        self.bump(&self.keys.retry_count, job_type, RETRY_FIELD)
            .await?;
        self.coordinator
            .push_capped(&self.keys.attempts, &attempt_number.to_string(), self.attempts_cap)
            .await?;

        let now = self.clock.epoch_seconds();
        let member = format!("{now:.6}:{}", uuid::Uuid::new_v4());
        self.coordinator
            .zadd(&self.keys.retry_times, &member, now)
            .await?;
        self.coordinator
            .zrem_range_by_score(&self.keys.retry_times, 0.0, now - self.retention.as_secs_f64())
            .await?;
        Ok(())
    }

    async fn try_record_blocked(&self, job_type: &str, reason: &str) -> Result<(), StoreError> {
        self.bump(&self.keys.block_count, job_type, BLOCK_FIELD)
            .await?;
        self.coordinator
            .hincr(&self.keys.block_reasons, reason, 1)
            .await?;
        Ok(())
    }

    /// Increments a global counter and the matching per-job-type field.
    async fn bump(&self, global: &str, job_type: &str, field: &str) -> Result<(), StoreError> {
        self.coordinator.increment(global, 1).await?;
        self.coordinator
            .hincr(&self.keys.job_type(job_type), field, 1)
            .await?;
        self.coordinator
            .hset(&self.keys.job_types, job_type, "1")
            .await
    }

    async fn counter(&self, key: &str) -> Result<u64, StoreError> {
        let value = self.coordinator.get(key).await?;
        parse_count(key, value.as_ref())
    }
}

impl fmt::Debug for RetryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryMetrics")
            .field("namespace", &self.namespace)
            .field("attempts_cap", &self.attempts_cap)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

fn parse_count(key: &str, value: Option<&String>) -> Result<u64, StoreError> {
    match value {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| StoreError::corrupt(key, format!("not a counter: {raw}"))),
    }
}

/// Builder for [`RetryMetrics`].
pub struct RetryMetricsBuilder {
    coordinator: SharedCoordinator,
    namespace: String,
    attempts_cap: usize,
    retention: Duration,
    clock: SharedClock,
}

impl RetryMetricsBuilder {
    /// Creates a builder with default values.
    ///
    /// Defaults:
    /// - namespace: `retry_metrics`
    /// - attempts_cap: 10 000
    /// - retention: 1 hour
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self {
            coordinator,
            namespace: "retry_metrics".to_string(),
            attempts_cap: 10_000,
            retention: Duration::from_secs(3600),
            clock: system_clock(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets how many recent attempt numbers feed the average.
    pub fn attempts_cap(mut self, cap: usize) -> Self {
        self.attempts_cap = cap.max(1);
        self
    }

    /// Sets how long retry timestamps are kept for rate queries.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RetryMetrics {
        crate::describe_metrics();
        RetryMetrics {
            coordinator: self.coordinator,
            keys: Keys::new(&self.namespace),
            namespace: self.namespace,
            attempts_cap: self.attempts_cap,
            retention: self.retention,
            clock: self.clock,
        }
    }
}
