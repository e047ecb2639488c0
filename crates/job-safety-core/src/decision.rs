//! Retry decisions.
//!
//! "Not allowed to retry" is a routine outcome, so the retry policy and the
//! circuit breaker return a [`RetryDecision`] instead of an error.

use crate::FailureKind;
use std::fmt;
use std::time::Duration;

/// Whether a retry may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// The retry may proceed.
    Allowed,
    /// The retry must not proceed.
    Blocked(BlockReason),
}

impl RetryDecision {
    /// Returns `true` if the retry may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RetryDecision::Allowed)
    }

    /// The reason the retry was blocked, if it was.
    pub fn reason(&self) -> Option<&BlockReason> {
        match self {
            RetryDecision::Allowed => None,
            RetryDecision::Blocked(reason) => Some(reason),
        }
    }

    /// Converts into a `Result`, for callers that want `?`.
    pub fn into_result(self) -> Result<(), BlockReason> {
        match self {
            RetryDecision::Allowed => Ok(()),
            RetryDecision::Blocked(reason) => Err(reason),
        }
    }
}

/// Why a retry was blocked.
///
/// The `Display` form is meant to be shown to operators as-is; [`code`]
/// is a stable label for metrics.
///
/// [`code`]: BlockReason::code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// The job has used up its retry budget.
    MaxAttempts {
        /// The effective ceiling that was reached.
        max: u32,
    },
    /// The job is still inside its backoff window.
    Cooldown {
        /// Time left until the next retry is allowed.
        remaining: Duration,
    },
    /// The circuit breaker for the job type is open.
    CircuitOpen {
        /// The job type whose breaker is open.
        job_type: String,
    },
    /// The failure is not worth retrying.
    NonRetryable {
        /// The classified failure.
        kind: FailureKind,
    },
}

impl BlockReason {
    /// A stable, machine-readable label.
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::MaxAttempts { .. } => "max_attempts",
            BlockReason::Cooldown { .. } => "cooldown",
            BlockReason::CircuitOpen { .. } => "circuit_open",
            BlockReason::NonRetryable { .. } => "non_retryable",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::MaxAttempts { .. } => f.write_str("Maximum retry attempts reached"),
            BlockReason::Cooldown { remaining } => {
                // round up so "wait 0s" is never shown while still blocked
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                write!(f, "Cooldown active, wait {}s", secs)
            }
            BlockReason::CircuitOpen { job_type } => write!(
                f,
                "Circuit breaker open for {}, manual override required",
                job_type
            ),
            BlockReason::NonRetryable { kind } => {
                write!(f, "Failure is not retryable ({})", kind)
            }
        }
    }
}

impl std::error::Error for BlockReason {}
