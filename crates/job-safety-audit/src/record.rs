use chrono::{DateTime, Utc};
use job_safety_core::{FailureKind, JobHandle};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One retry decision, as written to the audit trail.
///
/// Records are immutable once logged. `dry_run` records describe a retry
/// that was evaluated but not actually requeued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAuditRecord {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    /// Who asked for the retry: `system` for automatic retries, otherwise a user.
    pub initiator: String,
    pub reason: String,
    /// The job's `retry_attempts` at the time of logging.
    pub attempt_number: u32,
    pub failure_kind: FailureKind,
    pub dry_run: bool,
    pub func_name: String,
    pub args_repr: String,
    pub kwargs_repr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// `None` while the outcome is not known yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RetryAuditRecord {
    pub(crate) fn capture<J: JobHandle + ?Sized>(
        job: &J,
        attempt: RetryAttempt,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let meta = job.meta();
        Self {
            job_id: job.id().to_string(),
            timestamp,
            initiator: attempt.initiator,
            reason: attempt.reason,
            attempt_number: meta.retry_attempts(),
            failure_kind: attempt.failure_kind,
            dry_run: attempt.dry_run,
            func_name: job.func_name().to_string(),
            args_repr: job.args_repr(),
            kwargs_repr: job.kwargs_repr(),
            idempotency_key: meta.idempotency_key().map(str::to_string),
            success: attempt.success,
            error_message: attempt.error_message,
        }
    }
}

/// What to log about a retry, beyond what the job itself carries.
///
/// ```rust
/// use job_safety_audit::RetryAttempt;
/// use job_safety_core::FailureKind;
///
/// let attempt = RetryAttempt::new("exchange timeout", FailureKind::Timeout)
///     .initiator("alice")
///     .failed("timed out again after 30s");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    pub(crate) reason: String,
    pub(crate) failure_kind: FailureKind,
    pub(crate) initiator: String,
    pub(crate) dry_run: bool,
    pub(crate) success: Option<bool>,
    pub(crate) error_message: Option<String>,
}

impl RetryAttempt {
    /// An automatic retry with an unknown outcome.
    pub fn new(reason: impl Into<String>, failure_kind: FailureKind) -> Self {
        Self {
            reason: reason.into(),
            failure_kind,
            initiator: "system".to_string(),
            dry_run: false,
            success: None,
            error_message: None,
        }
    }

    /// Sets who asked for the retry.
    pub fn initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = initiator.into();
        self
    }

    /// Marks the attempt as evaluated but not executed.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn succeeded(mut self) -> Self {
        self.success = Some(true);
        self.error_message = None;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = Some(false);
        self.error_message = Some(error.into());
        self
    }
}

/// Selects records from the audit trail. Bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub job_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl HistoryFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn matches(&self, record: &RetryAuditRecord) -> bool {
        self.job_id.as_deref().map_or(true, |id| record.job_id == id)
            && self.start.map_or(true, |start| record.timestamp >= start)
            && self.end.map_or(true, |end| record.timestamp <= end)
    }
}

/// Aggregates over the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub total_retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub dry_runs: u64,
    pub unique_jobs: u64,
    pub failure_kinds: BTreeMap<FailureKind, u64>,
}

impl AuditStats {
    pub(crate) fn from_records<'a>(records: impl IntoIterator<Item = &'a RetryAuditRecord>) -> Self {
        let mut stats = AuditStats::default();
        let mut jobs = std::collections::BTreeSet::new();
        for record in records {
            stats.total_retries += 1;
            match record.success {
                Some(true) => stats.successful_retries += 1,
                Some(false) => stats.failed_retries += 1,
                None => {}
            }
            if record.dry_run {
                stats.dry_runs += 1;
            }
            jobs.insert(record.job_id.as_str());
            *stats.failure_kinds.entry(record.failure_kind).or_default() += 1;
        }
        stats.unique_jobs = jobs.len() as u64;
        stats
    }
}
