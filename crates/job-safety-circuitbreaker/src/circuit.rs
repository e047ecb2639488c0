use crate::config::CircuitBreakerConfig;
use crate::events::CircuitEvent;
use crate::{CircuitState, CircuitStatus};
use chrono::{DateTime, Utc};
use job_safety_core::{
    Alert, AlertKind, BlockReason, RetryDecision, SharedCoordinator, StoreError,
};
#[cfg(feature = "metrics")]
use metrics::{counter, gauge};
use std::fmt;
use std::sync::Arc;

const ALERT_KINDS: [AlertKind; 3] = [
    AlertKind::CircuitOpened,
    AlertKind::CircuitReopened,
    AlertKind::ManualOverrideSet,
];

/// Who authorized a recovery trial, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualOverride {
    pub user: String,
    pub reason: String,
    /// When the override was set, as stored (RFC 3339).
    pub set_at: Option<String>,
}

struct Keys {
    state: String,
    failures: String,
    manual_override: String,
    last_alert_prefix: String,
}

impl Keys {
    fn new(namespace: &str, job_type: &str) -> Self {
        Self {
            state: format!("{namespace}:{job_type}:state"),
            failures: format!("{namespace}:{job_type}:failures"),
            manual_override: format!("{namespace}:{job_type}:manual_override"),
            last_alert_prefix: format!("{namespace}:{job_type}:last_alert"),
        }
    }

    fn last_alert(&self, kind: AlertKind) -> String {
        format!("{}:{}", self.last_alert_prefix, kind.as_str())
    }
}

/// The circuit breaker of one job type.
///
/// All state lives in the coordinator, so every worker that builds a breaker
/// for the same job type and namespace shares one circuit:
///
/// | key                                 | holds                              |
/// |-------------------------------------|------------------------------------|
/// | `{ns}:{job_type}:state`             | `closed`, `open` or `half_open`    |
/// | `{ns}:{job_type}:failures`          | sorted set of failure timestamps   |
/// | `{ns}:{job_type}:manual_override`   | hash of `user`, `reason`, `timestamp` |
/// | `{ns}:{job_type}:last_alert:{kind}` | alert rate limit marker            |
///
/// A missing state key reads as closed. An open circuit never closes by
/// itself: an operator has to call [`set_manual_override`], which moves it to
/// half-open, and the next recorded success closes it.
///
/// [`set_manual_override`]: CircuitBreaker::set_manual_override
pub struct CircuitBreaker {
    job_type: String,
    coordinator: SharedCoordinator,
    config: Arc<CircuitBreakerConfig>,
    keys: Keys,
}

impl CircuitBreaker {
    /// Creates the breaker for `job_type`.
    pub fn new(
        coordinator: SharedCoordinator,
        job_type: impl Into<String>,
        config: impl Into<Arc<CircuitBreakerConfig>>,
    ) -> Self {
        let job_type = job_type.into();
        let config = config.into();
        let keys = Keys::new(&config.namespace, &job_type);
        crate::describe_metrics();
        Self {
            job_type,
            coordinator,
            config,
            keys,
        }
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// The current state. A missing key reads as closed.
    pub async fn state(&self) -> Result<CircuitState, StoreError> {
        match self.coordinator.get(&self.keys.state).await? {
            None => Ok(CircuitState::Closed),
            Some(raw) => raw
                .parse()
                .map_err(|e: crate::UnknownCircuitState| {
                    StoreError::corrupt(&self.keys.state, e.to_string())
                }),
        }
    }

    /// Returns `true` if retries are currently blocked by state, ignoring overrides.
    pub async fn is_open(&self) -> Result<bool, StoreError> {
        Ok(self.state().await? == CircuitState::Open)
    }

    /// Records a failure of this job type and returns the resulting state.
    ///
    /// The failure is added to the window and entries older than the window
    /// are pruned. A closed circuit opens once the window holds
    /// `failure_threshold` failures. A half-open circuit reopens on any
    /// failure unless `reopen_on_trial_failure` is disabled.
    pub async fn record_failure(&self) -> Result<CircuitState, StoreError> {
        let now = self.config.clock.now();
        let failure_count = self.add_failure(now).await?;
        let state = self.state().await?;

        self.config.event_listeners.emit(&CircuitEvent::FailureRecorded {
            job_type: self.job_type.clone(),
            timestamp: now,
            state,
            failure_count,
        });

        match state {
            CircuitState::Closed if failure_count >= self.config.failure_threshold => {
                tracing::error!(
                    job_type = %self.job_type,
                    failure_count,
                    window_secs = self.config.time_window.as_secs(),
                    "circuit breaker threshold exceeded"
                );
                self.transition(state, CircuitState::Open, now).await?;
                self.raise_alert(
                    AlertKind::CircuitOpened,
                    format!(
                        "Circuit breaker opened for {}: threshold {} exceeded in {}s",
                        self.job_type,
                        self.config.failure_threshold,
                        self.config.time_window.as_secs()
                    ),
                    failure_count,
                    now,
                )
                .await;
                tracing::error!(
                    job_type = %self.job_type,
                    "CIRCUIT BREAKER OPEN for {}. Manual override required to resume retries.",
                    self.job_type
                );
                Ok(CircuitState::Open)
            }
            CircuitState::HalfOpen if self.config.reopen_on_trial_failure => {
                self.coordinator.delete(&self.keys.manual_override).await?;
                self.transition(state, CircuitState::Open, now).await?;
                self.raise_alert(
                    AlertKind::CircuitReopened,
                    format!(
                        "Circuit breaker reopened for {}: recovery trial failed",
                        self.job_type
                    ),
                    failure_count,
                    now,
                )
                .await;
                Ok(CircuitState::Open)
            }
            _ => Ok(state),
        }
    }

    /// Records a success and returns the resulting state.
    ///
    /// A half-open circuit closes and its failure window is cleared.
    pub async fn record_success(&self) -> Result<CircuitState, StoreError> {
        let now = self.config.clock.now();
        let state = self.state().await?;

        self.config.event_listeners.emit(&CircuitEvent::SuccessRecorded {
            job_type: self.job_type.clone(),
            timestamp: now,
            state,
        });

        if state != CircuitState::HalfOpen {
            return Ok(state);
        }

        tracing::info!(job_type = %self.job_type, "circuit breaker closing after successful retry");
        self.coordinator.delete(&self.keys.failures).await?;
        self.coordinator.delete(&self.keys.manual_override).await?;
        self.transition(state, CircuitState::Closed, now).await?;
        Ok(CircuitState::Closed)
    }

    /// Decides whether a job of this type may be retried.
    ///
    /// Closed and half-open circuits allow. An open circuit allows only while
    /// a manual override is present.
    pub async fn can_retry(&self) -> Result<RetryDecision, StoreError> {
        match self.state().await? {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(RetryDecision::Allowed),
            CircuitState::Open => {
                if self.has_manual_override().await? {
                    tracing::info!(job_type = %self.job_type, "manual override active, allowing retry");
                    return Ok(RetryDecision::Allowed);
                }

                self.config.event_listeners.emit(&CircuitEvent::CallRejected {
                    job_type: self.job_type.clone(),
                    timestamp: self.config.clock.now(),
                });
                #[cfg(feature = "metrics")]
                counter!("job_circuit_rejections_total", "job_type" => self.job_type.clone())
                    .increment(1);

                Ok(RetryDecision::Blocked(BlockReason::CircuitOpen {
                    job_type: self.job_type.clone(),
                }))
            }
        }
    }

    /// Authorizes a recovery trial: records who and why, and moves the
    /// circuit to half-open.
    pub async fn set_manual_override(&self, user: &str, reason: &str) -> Result<(), StoreError> {
        let now = self.config.clock.now();
        let key = &self.keys.manual_override;
        self.coordinator.hset(key, "user", user).await?;
        self.coordinator.hset(key, "reason", reason).await?;
        self.coordinator
            .hset(key, "timestamp", &now.to_rfc3339())
            .await?;

        let from = self.state().await?;
        self.transition(from, CircuitState::HalfOpen, now).await?;

        tracing::warn!(
            job_type = %self.job_type,
            user,
            reason,
            "manual override set, testing recovery"
        );
        self.config.event_listeners.emit(&CircuitEvent::OverrideSet {
            job_type: self.job_type.clone(),
            timestamp: now,
            user: user.to_string(),
            reason: reason.to_string(),
        });

        let alert = Alert::new(
            AlertKind::ManualOverrideSet,
            self.job_type.clone(),
            format!(
                "Manual override set for {} by {}: {}",
                self.job_type, user, reason
            ),
            now,
        )
        .with_detail("user", user)
        .with_detail("reason", reason);
        self.emit_alert(alert).await;
        Ok(())
    }

    pub async fn has_manual_override(&self) -> Result<bool, StoreError> {
        self.coordinator.exists(&self.keys.manual_override).await
    }

    /// The active override, if any.
    pub async fn manual_override(&self) -> Result<Option<ManualOverride>, StoreError> {
        let mut fields = self.coordinator.hget_all(&self.keys.manual_override).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(ManualOverride {
            user: fields.remove("user").unwrap_or_default(),
            reason: fields.remove("reason").unwrap_or_default(),
            set_at: fields.remove("timestamp"),
        }))
    }

    /// Failures inside the current window.
    pub async fn failure_count(&self) -> Result<u64, StoreError> {
        self.prune(self.config.clock.now()).await?;
        self.coordinator.zcard(&self.keys.failures).await
    }

    /// A snapshot for dashboards.
    pub async fn status(&self) -> Result<CircuitStatus, StoreError> {
        let state = self.state().await?;
        let failure_count = self.failure_count().await?;
        let has_manual_override = self.has_manual_override().await?;
        let can_retry = match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => has_manual_override,
        };

        Ok(CircuitStatus {
            job_type: self.job_type.clone(),
            state,
            failure_count,
            failure_threshold: self.config.failure_threshold,
            time_window: self.config.time_window,
            has_manual_override,
            can_retry,
        })
    }

    /// Clears state, failures, override and alert markers.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let now = self.config.clock.now();
        let from = self.state().await?;

        self.coordinator.delete(&self.keys.state).await?;
        self.coordinator.delete(&self.keys.failures).await?;
        self.coordinator.delete(&self.keys.manual_override).await?;
        for kind in ALERT_KINDS {
            self.coordinator.delete(&self.keys.last_alert(kind)).await?;
        }

        if from != CircuitState::Closed {
            self.announce_transition(from, CircuitState::Closed, now);
        }
        self.config.event_listeners.emit(&CircuitEvent::Reset {
            job_type: self.job_type.clone(),
            timestamp: now,
        });
        tracing::info!(job_type = %self.job_type, "circuit breaker reset");
        Ok(())
    }

    async fn add_failure(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let score = epoch_seconds(now);
        let member = format!("{score:.6}:{}", uuid::Uuid::new_v4());
        self.coordinator
            .zadd(&self.keys.failures, &member, score)
            .await?;
        self.coordinator
            .expire(&self.keys.failures, self.config.time_window)
            .await?;
        self.prune(now).await?;
        self.coordinator.zcard(&self.keys.failures).await
    }

    async fn prune(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = epoch_seconds(now) - self.config.time_window.as_secs_f64();
        self.coordinator
            .zrem_range_by_score(&self.keys.failures, 0.0, cutoff)
            .await
    }

    async fn transition(
        &self,
        from: CircuitState,
        to: CircuitState,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.coordinator
            .set(&self.keys.state, to.as_str(), None)
            .await?;
        if from != to {
            self.announce_transition(from, to, now);
        }
        Ok(())
    }

    fn announce_transition(&self, from: CircuitState, to: CircuitState, now: DateTime<Utc>) {
        self.config
            .event_listeners
            .emit(&CircuitEvent::StateTransition {
                job_type: self.job_type.clone(),
                timestamp: now,
                from_state: from,
                to_state: to,
            });

        tracing::info!(job_type = %self.job_type, from = %from, to = %to, "circuit state transition");

        #[cfg(feature = "metrics")]
        {
            counter!(
                "job_circuit_transitions_total",
                "job_type" => self.job_type.clone(),
                "from" => from.as_str(),
                "to" => to.as_str()
            )
            .increment(1);
            gauge!("job_circuit_state", "job_type" => self.job_type.clone()).set(to.gauge_value());
        }
    }

    async fn raise_alert(
        &self,
        kind: AlertKind,
        message: String,
        failure_count: u64,
        now: DateTime<Utc>,
    ) {
        let alert = Alert::new(kind, self.job_type.clone(), message, now)
            .with_detail("failure_count", failure_count)
            .with_detail("failure_threshold", self.config.failure_threshold)
            .with_detail("time_window_secs", self.config.time_window.as_secs());
        self.emit_alert(alert).await;
    }

    /// Delivers `alert` unless one of the same kind went out within the
    /// alert cooldown. Coordinator errors are logged and drop the alert.
    async fn emit_alert(&self, alert: Alert) {
        let marker = self.keys.last_alert(alert.kind);
        let first = self
            .coordinator
            .set_if_absent(
                &marker,
                &alert.raised_at.to_rfc3339(),
                Some(self.config.alert_cooldown),
            )
            .await;

        match first {
            Ok(true) => self.config.alert_sinks.emit(&alert),
            Ok(false) => {
                tracing::debug!(job_type = %self.job_type, kind = %alert.kind, "alert cooldown active, skipping alert");
            }
            Err(e) => {
                tracing::error!(job_type = %self.job_type, kind = %alert.kind, error = %e, "failed to emit alert");
            }
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("job_type", &self.job_type)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}
