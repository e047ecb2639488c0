use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Counters of one job type.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct JobTypeMetrics {
    pub job_type: String,
    pub retry_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub block_count: u64,
}

impl JobTypeMetrics {
    /// Successes per retry, 0 when nothing was retried.
    pub fn success_rate(&self) -> f64 {
        ratio(self.success_count, self.retry_count)
    }

    /// Failures per retry, 0 when nothing was retried.
    pub fn failure_rate(&self) -> f64 {
        ratio(self.failure_count, self.retry_count)
    }
}

/// Every retry metric at one point in time.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    /// Window used for `retry_rate_per_minute`.
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_minutes"))]
    pub rate_window: Duration,
    pub retry_rate_per_minute: f64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub avg_attempts: f64,
    pub block_rate: f64,
    pub total_retries: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_blocks: u64,
    pub job_types: BTreeMap<String, JobTypeMetrics>,
    pub block_reasons: BTreeMap<String, u64>,
}

#[cfg(feature = "serde")]
fn serialize_minutes<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64() / 60.0)
}

pub(crate) fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
