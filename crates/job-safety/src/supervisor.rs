//! The whole retry control flow behind one object.

use job_safety_audit::{RetryAttempt, RetryAuditLogger};
use job_safety_circuitbreaker::{
    CircuitBreakerConfig, CircuitBreakerManager, CircuitState,
};
use job_safety_classifier::FailureClassifier;
use job_safety_core::{
    system_clock, BlockReason, FailureKind, JobHandle, RetryDecision, SharedClock,
    SharedCoordinator, StoreError,
};
use job_safety_idempotency::SideEffectGuard;
use job_safety_metrics::RetryMetrics;
use job_safety_patterns::{
    Anomaly, RetryAnomalyDetector, RetryHistogram, RetrySpikeDetector, RetryWindow,
    RetryWindowTracker,
};
use job_safety_retry::{RetryLimits, RetryPolicy};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Metadata key holding the kind of the job's most recent failure.
pub const LAST_FAILURE_KIND: &str = "last_failure_kind";

/// Errors returned by [`RetrySupervisor::run`].
#[derive(Debug, Error)]
pub enum SupervisorError<E> {
    /// The retry was refused; the job did not run.
    #[error("{0}")]
    Blocked(BlockReason),

    /// The coordinator or the job queue failed.
    #[error("retry bookkeeping failed: {0}")]
    Store(#[from] StoreError),

    /// The job ran and failed.
    #[error("job failed: {0}")]
    Job(E),
}

impl<E> SupervisorError<E> {
    /// Returns true if the retry was refused before the job ran.
    pub fn is_blocked(&self) -> bool {
        matches!(self, SupervisorError::Blocked(_))
    }

    /// Returns the job's own error if present.
    pub fn into_job_error(self) -> Option<E> {
        match self {
            SupervisorError::Job(e) => Some(e),
            _ => None,
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome<'a> {
    Succeeded,
    /// The attempt failed with this error description.
    Failed(&'a str),
}

/// What [`RetrySupervisor::complete`] recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The attempt number that completed.
    pub attempt: u32,
    /// Classified failure, `None` on success.
    pub failure_kind: Option<FailureKind>,
    /// Circuit state of the job type after recording the outcome.
    pub circuit: CircuitState,
    /// Whether another retry may follow. `None` after a success.
    pub next: Option<RetryDecision>,
    /// The retry window, when this outcome ended it.
    pub window: Option<RetryWindow>,
    /// Anomalies shown by the closed window.
    pub anomalies: Vec<Anomaly>,
}

impl Completion {
    /// Returns true if the job will not be retried again: it succeeded, hit
    /// its retry ceiling, or failed permanently.
    pub fn is_final(&self) -> bool {
        match &self.next {
            None => true,
            Some(decision) => is_terminal(decision),
        }
    }
}

fn is_terminal(decision: &RetryDecision) -> bool {
    matches!(
        decision.reason(),
        Some(BlockReason::MaxAttempts { .. } | BlockReason::NonRetryable { .. })
    )
}

/// Runs retries through every job-safety component.
///
/// For one retry the supervisor
/// 1. asks the [`RetryPolicy`] and then the job type's circuit breaker,
/// 2. records the attempt on the job, in the metrics and in the retry window,
/// 3. runs the job (which guards its side effects with
///    [`side_effects`](Self::side_effects)),
/// 4. classifies any failure and records the outcome in the breaker, the
///    metrics, the audit trail and the pattern detectors.
///
/// [`run`](Self::run) does all of it; [`check`](Self::check),
/// [`begin_attempt`](Self::begin_attempt) and [`complete`](Self::complete)
/// expose the steps for queues that drive execution themselves.
///
/// Metrics, audit and pattern recording are best effort. Only the policy,
/// the breaker and the job handle can fail a call.
pub struct RetrySupervisor {
    classifier: Arc<FailureClassifier>,
    policy: RetryPolicy,
    breakers: Arc<CircuitBreakerManager>,
    side_effects: Arc<SideEffectGuard>,
    metrics: Option<Arc<RetryMetrics>>,
    audit: Option<Arc<RetryAuditLogger>>,
    windows: Option<Arc<RetryWindowTracker>>,
    anomalies: Option<Arc<RetryAnomalyDetector>>,
    spikes: Option<Arc<RetrySpikeDetector>>,
    histogram: Mutex<RetryHistogram>,
    initiator: String,
}

impl RetrySupervisor {
    /// Creates a supervisor with default components over `coordinator`.
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self::builder(coordinator).build()
    }

    pub fn builder(coordinator: SharedCoordinator) -> RetrySupervisorBuilder {
        RetrySupervisorBuilder::new(coordinator)
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    /// The guard jobs should run their side effects through.
    pub fn side_effects(&self) -> Arc<SideEffectGuard> {
        Arc::clone(&self.side_effects)
    }

    pub fn metrics(&self) -> Option<&RetryMetrics> {
        self.metrics.as_deref()
    }

    pub fn audit(&self) -> Option<&RetryAuditLogger> {
        self.audit.as_deref()
    }

    pub fn windows(&self) -> Option<&RetryWindowTracker> {
        self.windows.as_deref()
    }

    /// Attempt distribution of the windows closed by this supervisor.
    pub fn histogram(&self) -> RetryHistogram {
        self.histogram
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decides whether `job` may be retried now.
    ///
    /// The policy is asked first, then the circuit breaker of `job_type`.
    /// A refusal is counted in the metrics.
    pub async fn check<J>(&self, job: &J, job_type: &str) -> Result<RetryDecision, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        let decision = self.gate(job, job_type).await?;
        if let RetryDecision::Blocked(reason) = &decision {
            tracing::info!(job_id = job.id(), job_type, reason = reason.code(), "retry refused: {}", reason);
            if let Some(metrics) = &self.metrics {
                metrics.record_blocked(job_type, reason.code()).await;
            }
        }
        Ok(decision)
    }

    /// Records the start of a retry attempt and returns its number.
    pub async fn begin_attempt<J>(&self, job: &mut J, job_type: &str) -> Result<u32, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        let attempt = self.policy.record_attempt(job).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_attempt(job_type, attempt).await;
        }
        if let Some(windows) = &self.windows {
            windows.increment_attempt(job.id()).await;
        }
        if let Some(spikes) = &self.spikes {
            if let Some(spike) = spikes.record_retry() {
                tracing::warn!(job_type, current = spike.current, "{}", spike);
            }
        }
        Ok(attempt)
    }

    /// Records how an attempt ended and decides what comes next.
    pub async fn complete<J>(
        &self,
        job: &mut J,
        job_type: &str,
        outcome: AttemptOutcome<'_>,
    ) -> Result<Completion, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        match outcome {
            AttemptOutcome::Succeeded => self.complete_success(job, job_type).await,
            AttemptOutcome::Failed(error) => self.complete_failure(job, job_type, error).await,
        }
    }

    /// Runs one retry of `job` end to end.
    ///
    /// Returns the job's result, or why it did not run or failed. The
    /// failure's classification and the next decision are recorded on the
    /// job and in the audit trail.
    pub async fn run<J, T, E, F, Fut>(
        &self,
        job: &mut J,
        job_type: &str,
        operation: F,
    ) -> Result<T, SupervisorError<E>>
    where
        J: JobHandle + ?Sized,
        E: fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let RetryDecision::Blocked(reason) = self.check(job, job_type).await? {
            return Err(SupervisorError::Blocked(reason));
        }

        self.begin_attempt(job, job_type).await?;
        match operation().await {
            Ok(value) => {
                self.complete(job, job_type, AttemptOutcome::Succeeded).await?;
                Ok(value)
            }
            Err(e) => {
                let description = e.to_string();
                self.complete(job, job_type, AttemptOutcome::Failed(&description))
                    .await?;
                Err(SupervisorError::Job(e))
            }
        }
    }

    /// Evaluates a retry without running it and logs the evaluation to the
    /// audit trail as a dry run.
    pub async fn dry_run<J>(
        &self,
        job: &J,
        job_type: &str,
        reason: &str,
        initiator: &str,
    ) -> Result<RetryDecision, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        let decision = self.gate(job, job_type).await?;
        tracing::info!(
            job_id = job.id(),
            job_type,
            initiator,
            allowed = decision.is_allowed(),
            "dry run retry evaluated"
        );
        if self.audit.is_some() {
            let mut reason = reason.to_string();
            if let Some(blocked) = decision.reason() {
                reason = format!("{reason} (would be blocked: {blocked})");
            }
            let attempt = RetryAttempt::new(reason, last_failure_kind(job))
                .initiator(initiator)
                .dry_run(true);
            self.audit_attempt(job, attempt).await;
        }
        Ok(decision)
    }

    /// Buffers an audit record. A flush it makes due runs on the blocking
    /// pool so the file writes never stall the executor.
    async fn audit_attempt<J>(&self, job: &J, attempt: RetryAttempt)
    where
        J: JobHandle + ?Sized,
    {
        let Some(audit) = &self.audit else {
            return;
        };
        if !audit.buffer_attempt(job, attempt) {
            return;
        }

        let audit = Arc::clone(audit);
        let flushed = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => match runtime.spawn_blocking(move || audit.flush()).await {
                Ok(flushed) => flushed,
                Err(e) => {
                    tracing::error!(error = %e, "retry audit flush task failed");
                    return;
                }
            },
            Err(_) => audit.flush(),
        };
        if let Err(e) = flushed {
            tracing::error!(error = %e, "failed to flush retry audit records");
        }
    }

    async fn gate<J>(&self, job: &J, job_type: &str) -> Result<RetryDecision, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        let decision = self.policy.can_retry(job);
        if !decision.is_allowed() {
            return Ok(decision);
        }
        self.breakers.breaker(job_type).can_retry().await
    }

    async fn complete_success<J>(&self, job: &mut J, job_type: &str) -> Result<Completion, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        let attempt = job.meta().retry_attempts();
        let circuit = self.breakers.breaker(job_type).record_success().await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_success(job_type).await;
        }
        let record = RetryAttempt::new("retry succeeded", last_failure_kind(job))
            .initiator(self.initiator.as_str())
            .succeeded();
        self.audit_attempt(job, record).await;

        job.meta_mut().remove(LAST_FAILURE_KIND);
        self.policy.reset_metadata(job).await?;

        let (window, anomalies) = self.close_window(job.id(), true).await;
        tracing::info!(job_id = job.id(), job_type, attempt, "retry succeeded");
        Ok(Completion {
            attempt,
            failure_kind: None,
            circuit,
            next: None,
            window,
            anomalies,
        })
    }

    async fn complete_failure<J>(
        &self,
        job: &mut J,
        job_type: &str,
        error: &str,
    ) -> Result<Completion, StoreError>
    where
        J: JobHandle + ?Sized,
    {
        let attempt = job.meta().retry_attempts();
        let classification = self.classifier.should_retry(error);
        let kind = classification.kind;

        job.meta_mut().insert(LAST_FAILURE_KIND, kind.as_str());
        job.save_meta().await?;

        let circuit = self.breakers.breaker(job_type).record_failure().await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_failure(job_type).await;
        }
        let record = RetryAttempt::new(kind.description(), kind)
            .initiator(self.initiator.as_str())
            .failed(error);
        self.audit_attempt(job, record).await;

        let next = if classification.retryable {
            self.gate(job, job_type).await?
        } else {
            if let Some(metrics) = &self.metrics {
                metrics.record_blocked(job_type, "non_retryable").await;
            }
            RetryDecision::Blocked(BlockReason::NonRetryable { kind })
        };

        let (window, anomalies) = if is_terminal(&next) {
            self.close_window(job.id(), false).await
        } else {
            (None, Vec::new())
        };

        tracing::warn!(
            job_id = job.id(),
            job_type,
            attempt,
            kind = kind.as_str(),
            circuit = circuit.as_str(),
            "retry failed"
        );
        Ok(Completion {
            attempt,
            failure_kind: Some(kind),
            circuit,
            next: Some(next),
            window,
            anomalies,
        })
    }

    async fn close_window(&self, job_id: &str, success: bool) -> (Option<RetryWindow>, Vec<Anomaly>) {
        let Some(windows) = &self.windows else {
            return (None, Vec::new());
        };
        let Some(window) = windows.close_window(job_id, success).await else {
            return (None, Vec::new());
        };

        self.histogram
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_window(&window);
        let anomalies = match &self.anomalies {
            Some(detector) => detector.record_window(&window),
            None => Vec::new(),
        };
        (Some(window), anomalies)
    }
}

impl fmt::Debug for RetrySupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySupervisor")
            .field("policy", &self.policy)
            .field("breakers", &self.breakers.job_types())
            .field("metrics", &self.metrics.is_some())
            .field("audit", &self.audit.is_some())
            .field("windows", &self.windows.is_some())
            .field("initiator", &self.initiator)
            .finish_non_exhaustive()
    }
}

fn last_failure_kind<J: JobHandle + ?Sized>(job: &J) -> FailureKind {
    job.meta()
        .get(LAST_FAILURE_KIND)
        .and_then(|value| value.as_str())
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(FailureKind::Unknown)
}

/// Builder for [`RetrySupervisor`].
///
/// Components that are not supplied are created with their defaults over
/// the builder's coordinator and clock. The audit trail is off unless a
/// logger is supplied, since it writes to disk.
pub struct RetrySupervisorBuilder {
    coordinator: SharedCoordinator,
    clock: SharedClock,
    classifier: Option<Arc<FailureClassifier>>,
    limits: RetryLimits,
    breakers: Option<Arc<CircuitBreakerManager>>,
    side_effects: Option<Arc<SideEffectGuard>>,
    metrics: Option<Option<Arc<RetryMetrics>>>,
    audit: Option<Arc<RetryAuditLogger>>,
    windows: Option<Option<Arc<RetryWindowTracker>>>,
    anomalies: Option<Option<Arc<RetryAnomalyDetector>>>,
    spikes: Option<Option<Arc<RetrySpikeDetector>>>,
    initiator: String,
}

impl RetrySupervisorBuilder {
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self {
            coordinator,
            clock: system_clock(),
            classifier: None,
            limits: RetryLimits::default(),
            breakers: None,
            side_effects: None,
            metrics: None,
            audit: None,
            windows: None,
            anomalies: None,
            spikes: None,
            initiator: "system".to_string(),
        }
    }

    /// Clock for the components created by the builder.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn classifier(mut self, classifier: Arc<FailureClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn limits(mut self, limits: RetryLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn breakers(mut self, breakers: Arc<CircuitBreakerManager>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn side_effects(mut self, guard: Arc<SideEffectGuard>) -> Self {
        self.side_effects = Some(guard);
        self
    }

    /// Uses `metrics`, or none with `None`.
    pub fn metrics(mut self, metrics: Option<Arc<RetryMetrics>>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn audit(mut self, audit: Arc<RetryAuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Uses `tracker` for retry windows, or none with `None`.
    pub fn windows(mut self, tracker: Option<Arc<RetryWindowTracker>>) -> Self {
        self.windows = Some(tracker);
        self
    }

    pub fn anomaly_detector(mut self, detector: Option<Arc<RetryAnomalyDetector>>) -> Self {
        self.anomalies = Some(detector);
        self
    }

    pub fn spike_detector(mut self, detector: Option<Arc<RetrySpikeDetector>>) -> Self {
        self.spikes = Some(detector);
        self
    }

    /// Who the audit trail names for automatic retries. Defaults to `system`.
    pub fn initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = initiator.into();
        self
    }

    pub fn build(self) -> RetrySupervisor {
        let coordinator = self.coordinator;
        let clock = self.clock;

        let breakers = self.breakers.unwrap_or_else(|| {
            let config = CircuitBreakerConfig::builder().clock(Arc::clone(&clock)).build();
            Arc::new(CircuitBreakerManager::with_config(Arc::clone(&coordinator), config))
        });
        let metrics = self.metrics.unwrap_or_else(|| {
            Some(Arc::new(
                RetryMetrics::builder(Arc::clone(&coordinator))
                    .clock(Arc::clone(&clock))
                    .build(),
            ))
        });
        let windows = self.windows.unwrap_or_else(|| {
            Some(Arc::new(
                RetryWindowTracker::builder(Arc::clone(&coordinator))
                    .clock(Arc::clone(&clock))
                    .build(),
            ))
        });
        let anomalies = self.anomalies.unwrap_or_else(|| {
            Some(Arc::new(
                RetryAnomalyDetector::builder().clock(Arc::clone(&clock)).build(),
            ))
        });
        let spikes = self.spikes.unwrap_or_else(|| {
            Some(Arc::new(
                RetrySpikeDetector::builder().clock(Arc::clone(&clock)).build(),
            ))
        });

        RetrySupervisor {
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(FailureClassifier::new())),
            policy: RetryPolicy::builder()
                .limits(self.limits)
                .clock(Arc::clone(&clock))
                .build(),
            breakers,
            side_effects: self
                .side_effects
                .unwrap_or_else(|| Arc::new(SideEffectGuard::new(Arc::clone(&coordinator)))),
            metrics,
            audit: self.audit,
            windows,
            anomalies,
            spikes,
            histogram: Mutex::new(RetryHistogram::new()),
            initiator: self.initiator,
        }
    }
}
