use crate::{EffectKind, GuardError};
use job_safety_core::{MarkOutcome, SharedCoordinator, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Value stored under a key while its operation is still running.
/// Serialized results are JSON and therefore never empty.
pub(crate) const PENDING: &str = "";

/// Default lifetime of a side-effect mark: 72 hours.
pub const DEFAULT_EFFECT_TTL: Duration = Duration::from_secs(72 * 3600);

/// What happened to a guarded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteOutcome<T> {
    /// `true` if this call ran the operation.
    pub executed: bool,
    /// The operation's result, or the cached result of the earlier run.
    /// `None` for a duplicate whose first run has not cached anything yet.
    pub result: Option<T>,
}

impl<T> ExecuteOutcome<T> {
    fn ran(result: T) -> Self {
        Self {
            executed: true,
            result: Some(result),
        }
    }

    fn skipped(result: Option<T>) -> Self {
        Self {
            executed: false,
            result,
        }
    }

    /// Returns `true` if the call was a duplicate.
    pub fn is_duplicate(&self) -> bool {
        !self.executed
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingWait {
    timeout: Duration,
    poll_interval: Duration,
}

/// Configuration for a [`SideEffectGuard`].
#[derive(Debug, Clone)]
pub struct SideEffectGuardConfig {
    namespace: String,
    default_ttl: Duration,
    pending_wait: Option<PendingWait>,
}

impl Default for SideEffectGuardConfig {
    fn default() -> Self {
        Self {
            namespace: "idempotency".to_string(),
            default_ttl: DEFAULT_EFFECT_TTL,
            pending_wait: None,
        }
    }
}

/// Builder for a [`SideEffectGuard`].
pub struct SideEffectGuardBuilder {
    coordinator: SharedCoordinator,
    config: SideEffectGuardConfig,
}

impl SideEffectGuardBuilder {
    /// Key namespace. Keys look like `{namespace}:effect:{kind}:{entity_id}`.
    ///
    /// Default: `"idempotency"`
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// How long a mark (and its cached result) is kept.
    ///
    /// Default: 72 hours
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Makes a duplicate caller that arrives while the first run is still in
    /// flight poll for its result, for up to `timeout`.
    ///
    /// Default: off. Duplicates return immediately with whatever is cached.
    pub fn await_pending_result(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.config.pending_wait = Some(PendingWait {
            timeout,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        });
        self
    }

    pub fn build(self) -> SideEffectGuard {
        SideEffectGuard {
            coordinator: self.coordinator,
            config: self.config,
        }
    }
}

/// Runs side effects at most once per `(effect kind, entity id)`.
///
/// The guard takes an atomic mark in the coordinator before running the
/// operation. Only the caller that wins the mark runs it, however many
/// workers race for the same entity. A successful result is cached under the
/// mark as JSON; a failed operation releases the mark so a retry can run it.
///
/// If the future returned by `execute_once` is dropped while the operation
/// is running, the mark stays in place until its TTL runs out.
pub struct SideEffectGuard {
    coordinator: SharedCoordinator,
    config: SideEffectGuardConfig,
}

impl SideEffectGuard {
    /// Creates a guard with the default configuration.
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self::builder(coordinator).build()
    }

    pub fn builder(coordinator: SharedCoordinator) -> SideEffectGuardBuilder {
        SideEffectGuardBuilder {
            coordinator,
            config: SideEffectGuardConfig::default(),
        }
    }

    /// The coordinator key for an effect.
    pub fn key(&self, effect: &EffectKind, entity_id: &str) -> String {
        format!("{}:effect:{}:{}", self.config.namespace, effect, entity_id)
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Returns `true` if the effect has been marked, whether or not it has finished.
    pub async fn is_executed(&self, effect: &EffectKind, entity_id: &str) -> Result<bool, StoreError> {
        self.coordinator.exists(&self.key(effect, entity_id)).await
    }

    /// Marks the effect as executed without running anything.
    ///
    /// Returns `false` if it was already marked.
    pub async fn mark_executed(&self, effect: &EffectKind, entity_id: &str) -> Result<bool, StoreError> {
        self.coordinator
            .set_if_absent(
                &self.key(effect, entity_id),
                PENDING,
                Some(self.config.default_ttl),
            )
            .await
    }

    /// Marks the effect as executed and caches `result` under the mark.
    ///
    /// Returns `false`, and leaves the existing mark alone, if it was already marked.
    pub async fn mark_executed_with<T: Serialize>(
        &self,
        effect: &EffectKind,
        entity_id: &str,
        result: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let key = self.key(effect, entity_id);
        let json = serde_json::to_string(result).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.coordinator
            .set_if_absent(&key, &json, Some(ttl.unwrap_or(self.config.default_ttl)))
            .await
    }

    /// Reads the cached result of an earlier run.
    ///
    /// `None` if the effect was never run, is still running, or cached nothing.
    pub async fn cached_result<T: DeserializeOwned>(
        &self,
        effect: &EffectKind,
        entity_id: &str,
    ) -> Result<Option<T>, StoreError> {
        let key = self.key(effect, entity_id);
        match self.coordinator.get(&key).await? {
            None => Ok(None),
            Some(raw) if raw == PENDING => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key,
                    reason: e.to_string(),
                }),
        }
    }

    /// Runs `operation` unless this effect already ran, using the default TTL.
    pub async fn execute_once<T, E, F, Fut>(
        &self,
        effect: &EffectKind,
        entity_id: &str,
        operation: F,
    ) -> Result<ExecuteOutcome<T>, GuardError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_once_with_ttl(effect, entity_id, self.config.default_ttl, operation)
            .await
    }

    /// Runs `operation` unless this effect already ran within `ttl`.
    ///
    /// A coordinator failure before the mark is taken is returned as
    /// [`GuardError::Store`] and the operation is not run. Failing to cache
    /// the result afterwards is only logged: the operation has happened and
    /// the mark still blocks duplicates.
    pub async fn execute_once_with_ttl<T, E, F, Fut>(
        &self,
        effect: &EffectKind,
        entity_id: &str,
        ttl: Duration,
        operation: F,
    ) -> Result<ExecuteOutcome<T>, GuardError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key(effect, entity_id);

        if let MarkOutcome::Existing(value) =
            self.coordinator.check_and_mark(&key, PENDING, ttl).await?
        {
            tracing::info!(effect = %effect, entity_id, "side effect already executed, skipping");
            let value = match value {
                Some(v) if v != PENDING => Some(v),
                _ => self.wait_for_result(&key).await,
            };
            return Ok(ExecuteOutcome::skipped(decode(&key, value)));
        }

        tracing::info!(effect = %effect, entity_id, "executing side effect");
        match operation().await {
            Ok(result) => {
                match serde_json::to_string(&result) {
                    Ok(json) => {
                        if let Err(e) = self.coordinator.set(&key, &json, Some(ttl)).await {
                            tracing::warn!(key, error = %e, "failed to cache side effect result");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(key, error = %e, "side effect result is not serializable");
                    }
                }
                Ok(ExecuteOutcome::ran(result))
            }
            Err(e) => {
                tracing::error!(effect = %effect, entity_id, "side effect failed, releasing mark");
                if let Err(del) = self.coordinator.delete(&key).await {
                    tracing::error!(key, error = %del, "failed to release side effect mark");
                }
                Err(GuardError::Operation(e))
            }
        }
    }

    /// Removes the mark so the effect can run again. Use with care.
    pub async fn clear(&self, effect: &EffectKind, entity_id: &str) -> Result<bool, StoreError> {
        let cleared = self.coordinator.delete(&self.key(effect, entity_id)).await?;
        if cleared {
            tracing::warn!(effect = %effect, entity_id, "cleared side effect mark");
        }
        Ok(cleared)
    }

    /// Remaining lifetime of the mark.
    pub async fn ttl(&self, effect: &EffectKind, entity_id: &str) -> Result<Option<Duration>, StoreError> {
        self.coordinator.ttl(&self.key(effect, entity_id)).await
    }

    async fn wait_for_result(&self, key: &str) -> Option<String> {
        let wait = self.config.pending_wait?;
        let deadline = tokio::time::Instant::now() + wait.timeout;
        loop {
            tokio::time::sleep(wait.poll_interval).await;
            match self.coordinator.get(key).await {
                Ok(Some(v)) if v != PENDING => return Some(v),
                Ok(Some(_)) => {}
                // the first run failed and released its mark
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(key, error = %e, "stopped waiting for side effect result");
                    return None;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::debug!(key, "timed out waiting for side effect result");
                return None;
            }
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Option<String>) -> Option<T> {
    let raw = value?;
    match serde_json::from_str(&raw) {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::warn!(key, error = %e, "ignoring unreadable cached side effect result");
            None
        }
    }
}

impl fmt::Debug for SideEffectGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SideEffectGuard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
