use crate::RetryLimits;
use chrono::{DateTime, Utc};
use job_safety_core::{system_clock, BlockReason, JobHandle, RetryDecision, SharedClock, StoreError};
use std::fmt;
use std::time::Duration;

/// A snapshot of one job's retry bookkeeping, for operator tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStatus {
    /// The current verdict.
    pub decision: RetryDecision,
    /// Attempts recorded so far.
    pub attempts: u32,
    /// The effective ceiling, including any per-job override.
    pub max_retries: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub first_failed_at: Option<DateTime<Utc>>,
    /// When the cooldown after the last attempt ends.
    pub next_retry_at: Option<DateTime<Utc>>,
    /// The cooldown that applies at the current attempt count.
    pub cooldown: Duration,
}

impl RetryStatus {
    pub fn can_retry(&self) -> bool {
        self.decision.is_allowed()
    }
}

/// Per-job retry gating with exponential cooldown.
///
/// The policy keeps no state of its own. Attempt counts and timestamps live
/// in the job's metadata and are committed through the job handle, so every
/// worker that picks the job up sees the same history.
pub struct RetryPolicy {
    limits: RetryLimits,
    clock: SharedClock,
}

impl RetryPolicy {
    /// Creates a policy with the given limits and the system clock.
    pub fn new(limits: RetryLimits) -> Self {
        Self {
            limits,
            clock: system_clock(),
        }
    }

    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn limits(&self) -> &RetryLimits {
        &self.limits
    }

    /// The retry ceiling for `job`: its `custom_max_retries` if set, else the global one.
    pub fn effective_max_retries<J: JobHandle + ?Sized>(&self, job: &J) -> u32 {
        job.meta()
            .custom_max_retries()
            .unwrap_or(self.limits.max_retries)
    }

    /// The cooldown after `attempts` attempts.
    pub fn cooldown_for(&self, attempts: u32) -> Duration {
        self.limits.cooldown_for(attempts)
    }

    /// Decides whether `job` may be retried now.
    pub fn can_retry<J: JobHandle + ?Sized>(&self, job: &J) -> RetryDecision {
        let meta = job.meta();
        let attempts = meta.retry_attempts();
        let max = self.effective_max_retries(job);

        if attempts >= max {
            let reason = BlockReason::MaxAttempts { max };
            tracing::warn!(job_id = job.id(), attempts, max, "job cannot retry: {}", reason);
            return RetryDecision::Blocked(reason);
        }

        if let Some(remaining) = self.cooldown_remaining(meta.last_retry_at(), attempts) {
            let reason = BlockReason::Cooldown { remaining };
            tracing::info!(job_id = job.id(), attempts, "job cannot retry yet: {}", reason);
            return RetryDecision::Blocked(reason);
        }

        tracing::info!(
            job_id = job.id(),
            "job can be retried (attempt {}/{})",
            attempts + 1,
            max
        );
        RetryDecision::Allowed
    }

    /// Records one retry attempt and commits it to the job.
    ///
    /// Returns the new attempt count.
    pub async fn record_attempt<J: JobHandle + ?Sized>(&self, job: &mut J) -> Result<u32, StoreError> {
        let now = self.clock.now();
        let meta = job.meta_mut();
        let attempts = meta.retry_attempts().saturating_add(1);
        meta.set_retry_attempts(attempts);
        meta.set_last_retry_at(Some(now));
        if meta.first_failed_at().is_none() {
            meta.set_first_failed_at(Some(now));
        }
        job.save_meta().await?;

        tracing::info!(job_id = job.id(), attempts, at = %now.to_rfc3339(), "recorded retry attempt");
        Ok(attempts)
    }

    /// Clears the retry bookkeeping, typically after the job finally succeeds.
    pub async fn reset_metadata<J: JobHandle + ?Sized>(&self, job: &mut J) -> Result<(), StoreError> {
        let meta = job.meta_mut();
        meta.set_retry_attempts(0);
        meta.set_last_retry_at(None);
        meta.set_first_failed_at(None);
        job.save_meta().await?;

        tracing::info!(job_id = job.id(), "reset retry metadata");
        Ok(())
    }

    /// Raises the retry ceiling of one job by `additional`, leaving the global
    /// default alone. Returns the new ceiling.
    pub async fn extend_retry_limit<J: JobHandle + ?Sized>(
        &self,
        job: &mut J,
        additional: u32,
    ) -> Result<u32, StoreError> {
        let current = self.effective_max_retries(job);
        let extended = current.saturating_add(additional);
        job.meta_mut().set_custom_max_retries(extended);
        job.save_meta().await?;

        tracing::info!(job_id = job.id(), from = current, to = extended, "extended retry limit");
        Ok(extended)
    }

    /// A snapshot of the job's retry state.
    pub fn status<J: JobHandle + ?Sized>(&self, job: &J) -> RetryStatus {
        let meta = job.meta();
        let attempts = meta.retry_attempts();
        let last_retry_at = meta.last_retry_at();
        let cooldown = self.cooldown_for(attempts);
        let next_retry_at = last_retry_at.and_then(|last| {
            chrono::Duration::from_std(cooldown)
                .ok()
                .and_then(|c| last.checked_add_signed(c))
        });

        RetryStatus {
            decision: self.can_retry(job),
            attempts,
            max_retries: self.effective_max_retries(job),
            last_retry_at,
            first_failed_at: meta.first_failed_at(),
            next_retry_at,
            cooldown,
        }
    }

    fn cooldown_remaining(&self, last_retry_at: Option<DateTime<Utc>>, attempts: u32) -> Option<Duration> {
        let last = last_retry_at?;
        let cooldown = chrono::Duration::from_std(self.cooldown_for(attempts)).ok()?;
        let next = last.checked_add_signed(cooldown)?;
        let now = self.clock.now();
        if now < next {
            (next - now).to_std().ok()
        } else {
            None
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryLimits::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    limits: RetryLimits,
    clock: SharedClock,
}

impl RetryPolicyBuilder {
    /// Creates a builder with the default limits.
    ///
    /// Defaults:
    /// - max_retries: 3
    /// - cooldown: 60s
    /// - exponential_backoff: true
    /// - max_cooldown: 1h
    pub fn new() -> Self {
        Self {
            limits: RetryLimits::default(),
            clock: system_clock(),
        }
    }

    pub fn max_retries(mut self, max: u32) -> Self {
        self.limits.max_retries = max;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.limits.cooldown = cooldown;
        self
    }

    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.limits.exponential_backoff = enabled;
        self
    }

    pub fn max_cooldown(mut self, max: Duration) -> Self {
        self.limits.max_cooldown = max;
        self
    }

    /// Replaces all limits at once.
    pub fn limits(mut self, limits: RetryLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the clock used for cooldown checks and timestamps.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            limits: self.limits,
            clock: self.clock,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
