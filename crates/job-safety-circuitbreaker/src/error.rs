use job_safety_core::{BlockReason, StoreError};
use thiserror::Error;

/// Errors returned by the [`CircuitGate`](crate::CircuitGate) service.
#[derive(Debug, Error)]
pub enum CircuitGateError<E> {
    /// The circuit is open; the call was not made.
    #[error("{0}")]
    Open(BlockReason),

    /// The breaker could not read its state.
    #[error("circuit breaker unavailable: {0}")]
    Store(#[source] StoreError),

    /// An error returned by the inner service.
    #[error("inner service error: {0}")]
    Inner(E),
}

impl<E> CircuitGateError<E> {
    /// Returns true if the call was refused by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitGateError::Open(_))
    }

    /// Returns the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CircuitGateError::Inner(e) => Some(e),
            _ => None,
        }
    }
}
