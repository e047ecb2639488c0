use crate::{CircuitBreaker, CircuitGateError};
use futures::future::BoxFuture;
use job_safety_core::RetryDecision;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// A Tower layer that puts a job type's circuit breaker in front of a
/// job-executing service.
///
/// Every call first asks the breaker whether the job type may run. A refused
/// call never reaches the inner service. Calls that do run report their
/// outcome back to the breaker: an `Err` from the inner service counts as a
/// failure, an `Ok` as a success.
///
/// ```rust
/// use job_safety_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitGateLayer};
/// use job_safety_core::MemoryCoordinator;
/// use std::sync::Arc;
/// use tower::{service_fn, ServiceBuilder};
///
/// let breaker = Arc::new(CircuitBreaker::new(
///     Arc::new(MemoryCoordinator::new()),
///     "sync_balances",
///     CircuitBreakerConfig::default(),
/// ));
///
/// let service = ServiceBuilder::new()
///     .layer(CircuitGateLayer::new(breaker))
///     .service(service_fn(|job_id: String| async move { Ok::<_, std::io::Error>(job_id) }));
/// ```
#[derive(Debug, Clone)]
pub struct CircuitGateLayer {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitGateLayer {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl<S> Layer<S> for CircuitGateLayer {
    type Service = CircuitGate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitGate {
            inner,
            breaker: Arc::clone(&self.breaker),
        }
    }
}

/// The service produced by [`CircuitGateLayer`].
#[derive(Debug, Clone)]
pub struct CircuitGate<S> {
    inner: S,
    breaker: Arc<CircuitBreaker>,
}

impl<S> CircuitGate<S> {
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<S, Req> Service<Req> for CircuitGate<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = CircuitGateError<S::Error>;
    type Future = BoxFuture<'static, Result<S::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(CircuitGateError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let breaker = Arc::clone(&self.breaker);
        // take the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match breaker.can_retry().await.map_err(CircuitGateError::Store)? {
                RetryDecision::Allowed => {}
                RetryDecision::Blocked(reason) => {
                    tracing::debug!(job_type = breaker.job_type(), "circuit gate rejected call");
                    return Err(CircuitGateError::Open(reason));
                }
            }

            let result = inner.call(req).await;
            let recorded = match &result {
                Ok(_) => breaker.record_success().await,
                Err(_) => breaker.record_failure().await,
            };
            if let Err(e) = recorded {
                tracing::warn!(job_type = breaker.job_type(), error = %e, "failed to record call outcome");
            }
            result.map_err(CircuitGateError::Inner)
        })
    }
}
