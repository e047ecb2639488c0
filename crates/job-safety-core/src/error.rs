//! Errors raised when talking to shared state.
//!
//! Every component in the job-safety stack coordinates through a
//! [`Coordinator`](crate::Coordinator) and persists job metadata through a
//! [`JobHandle`](crate::JobHandle). Both can fail for infrastructure reasons,
//! and both report those failures as a [`StoreError`].
//!
//! Routine outcomes such as "retry not allowed" are never errors; they are
//! expressed as [`RetryDecision`](crate::RetryDecision) values instead.

use thiserror::Error;

/// A failure reading or writing shared state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the command.
    #[error("coordinator unavailable: {0}")]
    Unavailable(String),

    /// A key holds a value of a different shape than the operation expects.
    #[error("key {key:?} holds a value of the wrong type for this operation")]
    WrongType {
        /// The offending key.
        key: String,
    },

    /// A stored value could not be interpreted.
    #[error("key {key:?} holds an unreadable value: {reason}")]
    Corrupt {
        /// The offending key.
        key: String,
        /// What went wrong while decoding it.
        reason: String,
    },

    /// Job metadata could not be committed back to the job queue.
    #[error("failed to persist metadata for job {job_id}: {reason}")]
    JobMeta {
        /// The job whose metadata was being saved.
        job_id: String,
        /// Why the commit failed.
        reason: String,
    },

    /// An error from the Redis client.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Returns `true` if the failure is a connectivity problem rather than bad data.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            #[cfg(feature = "redis")]
            StoreError::Redis(e) => e.is_io_error() || e.is_connection_dropped(),
            _ => false,
        }
    }

    /// Builds a [`StoreError::Corrupt`] for `key`.
    pub fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
