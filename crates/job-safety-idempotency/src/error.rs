use job_safety_core::StoreError;
use thiserror::Error;

/// Errors returned by [`SideEffectGuard::execute_once`](crate::SideEffectGuard::execute_once).
///
/// A duplicate call is not an error; it is reported through
/// [`ExecuteOutcome::executed`](crate::ExecuteOutcome::executed).
#[derive(Debug, Error)]
pub enum GuardError<E> {
    /// The coordinator failed before the mark was taken. The operation did not run.
    #[error("coordinator error: {0}")]
    Store(#[from] StoreError),

    /// The guarded operation failed. Its mark has been released so a later
    /// attempt can run it.
    #[error("guarded operation failed: {0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    /// Returns true if the error came from the coordinator.
    pub fn is_store(&self) -> bool {
        matches!(self, GuardError::Store(_))
    }

    /// Returns the operation's error if present.
    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardError::Operation(e) => Some(e),
            GuardError::Store(_) => None,
        }
    }
}
