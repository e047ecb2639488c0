use job_safety_core::FailureKind;
use thiserror::Error;

/// Errors returned when extending a [`FailureClassifier`](crate::FailureClassifier).
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The pattern is not a valid regular expression.
    #[error("invalid failure pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A rule was added to the wrong table for its kind, e.g. a retryable
    /// rule mapping to a permanent kind.
    #[error("rule for {kind} must be added with retryable = {expected}")]
    KindMismatch { kind: FailureKind, expected: bool },
}
