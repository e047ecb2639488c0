use crate::{CircuitBreaker, CircuitBreakerConfig, CircuitStatus};
use job_safety_core::{SharedCoordinator, StoreError};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Owns the breakers of every job type a worker handles.
///
/// Breakers are created lazily and cached per job type. Since their state
/// lives in the coordinator, separate managers over the same coordinator see
/// the same circuits.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    coordinator: SharedCoordinator,
    default_config: Arc<CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerManager {
    /// Creates a manager whose breakers use the default configuration.
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self::with_config(coordinator, CircuitBreakerConfig::default())
    }

    /// Creates a manager whose breakers share `config`.
    pub fn with_config(
        coordinator: SharedCoordinator,
        config: impl Into<Arc<CircuitBreakerConfig>>,
    ) -> Self {
        Self {
            coordinator,
            default_config: config.into(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `job_type`, creating it on first use.
    pub fn breaker(&self, job_type: &str) -> Arc<CircuitBreaker> {
        self.breaker_with(job_type, || Arc::clone(&self.default_config))
    }

    /// Returns the breaker for `job_type`, creating it with the config from
    /// `config` on first use. An existing breaker keeps its config.
    pub fn breaker_with<F>(&self, job_type: &str, config: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce() -> Arc<CircuitBreakerConfig>,
    {
        if let Some(existing) = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
        {
            return Arc::clone(existing);
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        let breaker = breakers.entry(job_type.to_string()).or_insert_with(|| {
            tracing::debug!(job_type, "creating circuit breaker");
            Arc::new(CircuitBreaker::new(
                Arc::clone(&self.coordinator),
                job_type,
                config(),
            ))
        });
        Arc::clone(breaker)
    }

    /// Job types with a breaker in this manager, sorted.
    pub fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    /// Status of every breaker created so far, keyed by job type.
    pub async fn statuses(&self) -> Result<BTreeMap<String, CircuitStatus>, StoreError> {
        let breakers: Vec<Arc<CircuitBreaker>> = self
            .breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut statuses = BTreeMap::new();
        for breaker in breakers {
            statuses.insert(breaker.job_type().to_string(), breaker.status().await?);
        }
        Ok(statuses)
    }
}
