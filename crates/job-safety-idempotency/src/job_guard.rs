use job_safety_core::{JobHandle, SharedCoordinator, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;

/// Default lifetime of a job-level idempotency mark: 72 hours.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(72 * 3600);

const KEY_PREFIX: &str = "job:idempotency:";

/// Job-level idempotency: skips whole job executions that already ran.
///
/// Keyed by an opaque idempotency key rather than an effect and entity.
/// A "started" mark records the owning job id; a separate "completed" mark
/// lives twice as long so a finished job stays recognisable after its start
/// mark expires.
pub struct IdempotencyGuard {
    coordinator: SharedCoordinator,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self::with_ttl(coordinator, DEFAULT_JOB_TTL)
    }

    pub fn with_ttl(coordinator: SharedCoordinator, ttl: Duration) -> Self {
        Self { coordinator, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn started_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    fn completed_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}:completed")
    }

    fn result_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}:result")
    }

    /// Atomically claims `key` for `job_id`.
    ///
    /// Returns `false` if another job already holds it.
    pub async fn mark_started(&self, key: &str, job_id: &str) -> Result<bool, StoreError> {
        let claimed = self
            .coordinator
            .set_if_absent(&Self::started_key(key), job_id, Some(self.ttl))
            .await?;
        if claimed {
            tracing::info!(idempotency_key = key, job_id, "marked job as started");
        } else {
            let owner = self.owner(key).await.ok().flatten();
            tracing::warn!(
                idempotency_key = key,
                job_id,
                owner = owner.as_deref().unwrap_or("<expired>"),
                "idempotency key already claimed, skipping duplicate"
            );
        }
        Ok(claimed)
    }

    /// The job id holding the start mark.
    pub async fn owner(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.coordinator.get(&Self::started_key(key)).await
    }

    /// Records terminal success, optionally with a result payload.
    pub async fn mark_completed<T: Serialize>(
        &self,
        key: &str,
        result: Option<&T>,
    ) -> Result<(), StoreError> {
        self.coordinator
            .set(&Self::completed_key(key), "true", Some(self.ttl * 2))
            .await?;

        if let Some(result) = result {
            let result_key = Self::result_key(key);
            let json = serde_json::to_string(result).map_err(|e| StoreError::Corrupt {
                key: result_key.clone(),
                reason: e.to_string(),
            })?;
            self.coordinator.set(&result_key, &json, Some(self.ttl)).await?;
        }

        tracing::info!(idempotency_key = key, "marked job as completed");
        Ok(())
    }

    pub async fn is_completed(&self, key: &str) -> Result<bool, StoreError> {
        self.coordinator.exists(&Self::completed_key(key)).await
    }

    /// The stored result of a completed job.
    pub async fn result<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let result_key = Self::result_key(key);
        match self.coordinator.get(&result_key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key: result_key,
                    reason: e.to_string(),
                }),
        }
    }

    /// Releases the start mark so the job can run again.
    pub async fn clear(&self, key: &str) -> Result<bool, StoreError> {
        self.coordinator.delete(&Self::started_key(key)).await
    }
}

impl fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// Why [`RetryGuard::should_execute`] skipped a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A job with the same key already finished.
    AlreadyCompleted,
    /// A job with the same key is running or crashed mid-run.
    AlreadyRunning,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::AlreadyCompleted => "already_completed",
            SkipReason::AlreadyRunning => "already_running",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of [`RetryGuard::should_execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionVerdict {
    Execute,
    Skip(SkipReason),
}

impl ExecutionVerdict {
    pub fn should_execute(self) -> bool {
        matches!(self, ExecutionVerdict::Execute)
    }
}

/// Applies the job-level [`IdempotencyGuard`] to queued jobs.
///
/// Skips are recorded on the job's metadata (`skipped`, `skip_reason`,
/// `idempotency_key`) and committed through the job handle.
#[derive(Debug)]
pub struct RetryGuard {
    guard: IdempotencyGuard,
}

impl RetryGuard {
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self {
            guard: IdempotencyGuard::new(coordinator),
        }
    }

    pub fn from_guard(guard: IdempotencyGuard) -> Self {
        Self { guard }
    }

    pub fn idempotency_guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Decides whether `job` should run.
    ///
    /// Without a key the job always runs. Otherwise it is skipped if a job
    /// with the same key completed, or if another job holds the start mark.
    pub async fn should_execute<J>(
        &self,
        job: &mut J,
        idempotency_key: Option<&str>,
    ) -> Result<ExecutionVerdict, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        let Some(key) = idempotency_key else {
            tracing::debug!(job_id = job.id(), "job has no idempotency key, executing");
            return Ok(ExecutionVerdict::Execute);
        };

        let skip = if self.guard.is_completed(key).await? {
            Some(SkipReason::AlreadyCompleted)
        } else if !self.guard.mark_started(key, job.id()).await? {
            Some(SkipReason::AlreadyRunning)
        } else {
            None
        };

        let meta = job.meta_mut();
        meta.set_idempotency_key(key);
        if let Some(reason) = skip {
            meta.mark_skipped(reason.as_str());
        }
        job.save_meta().await?;

        match skip {
            Some(reason) => {
                tracing::info!(job_id = job.id(), idempotency_key = key, reason = reason.as_str(), "skipping job");
                Ok(ExecutionVerdict::Skip(reason))
            }
            None => Ok(ExecutionVerdict::Execute),
        }
    }

    /// Records that `job` finished successfully.
    pub async fn mark_success<J, T>(&self, job: &J, result: Option<&T>) -> Result<(), StoreError>
    where
        J: JobHandle + ?Sized,
        T: Serialize,
    {
        if let Some(key) = job.meta().idempotency_key() {
            self.guard.mark_completed(key, result).await?;
            tracing::info!(job_id = job.id(), "job marked as completed");
        }
        Ok(())
    }

    /// Releases the start mark of a failed job so a retry is not skipped.
    pub async fn mark_failure<J>(&self, job: &J) -> Result<(), StoreError>
    where
        J: JobHandle + ?Sized,
    {
        if let Some(key) = job.meta().idempotency_key() {
            if self.guard.owner(key).await?.as_deref() == Some(job.id()) {
                self.guard.clear(key).await?;
                tracing::info!(job_id = job.id(), idempotency_key = key, "released start mark after failure");
            }
        }
        Ok(())
    }

    /// Derives an idempotency key from a function name and its arguments:
    /// `{func}:{first 16 hex chars of sha256}`.
    pub fn idempotency_key_for(func_name: &str, args_repr: &str, kwargs_repr: &str) -> String {
        let payload = json!({
            "args": args_repr,
            "func": func_name,
            "kwargs": kwargs_repr,
        });
        let digest = hex::encode(Sha256::digest(payload.to_string().as_bytes()));
        format!("{func_name}:{}", &digest[..16])
    }

    /// [`idempotency_key_for`](Self::idempotency_key_for) over a job's own fields.
    pub fn idempotency_key_for_job<J: JobHandle + ?Sized>(job: &J) -> String {
        Self::idempotency_key_for(job.func_name(), &job.args_repr(), &job.kwargs_repr())
    }
}
