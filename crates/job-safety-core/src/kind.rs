//! The failure taxonomy shared by the classifier, audit log and metrics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The category a job failure falls into.
///
/// The first five kinds are transient and worth retrying. Everything else,
/// including [`FailureKind::Unknown`], is treated as permanent so that an
/// unrecognised error is never retried blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused, reset or dropped.
    NetworkError,
    /// The operation timed out.
    Timeout,
    /// An upstream rate limit was hit.
    RateLimit,
    /// A lock or contention error in a database or other resource.
    ResourceLock,
    /// A temporary upstream outage (502/503/504 and friends).
    TransientUpstream,
    /// Input failed validation.
    ValidationError,
    /// A programming error in the job body.
    LogicError,
    /// Required data does not exist.
    NotFound,
    /// The caller is not allowed to do this.
    PermissionError,
    /// The system is misconfigured.
    ConfigurationError,
    /// The account lacks the funds for the operation.
    InsufficientBalance,
    /// The account or key is banned or suspended.
    Banned,
    /// The request was malformed.
    BadRequest,
    /// The error did not match any known pattern.
    Unknown,
}

impl FailureKind {
    /// Every kind, retryable ones first.
    pub const ALL: [FailureKind; 14] = [
        FailureKind::NetworkError,
        FailureKind::Timeout,
        FailureKind::RateLimit,
        FailureKind::ResourceLock,
        FailureKind::TransientUpstream,
        FailureKind::ValidationError,
        FailureKind::LogicError,
        FailureKind::NotFound,
        FailureKind::PermissionError,
        FailureKind::ConfigurationError,
        FailureKind::InsufficientBalance,
        FailureKind::Banned,
        FailureKind::BadRequest,
        FailureKind::Unknown,
    ];

    /// Returns `true` for the transient kinds that may be retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::NetworkError
                | FailureKind::Timeout
                | FailureKind::RateLimit
                | FailureKind::ResourceLock
                | FailureKind::TransientUpstream
        )
    }

    /// The stable snake_case name used in storage and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::NetworkError => "network_error",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::ResourceLock => "resource_lock",
            FailureKind::TransientUpstream => "transient_upstream",
            FailureKind::ValidationError => "validation_error",
            FailureKind::LogicError => "logic_error",
            FailureKind::NotFound => "not_found",
            FailureKind::PermissionError => "permission_error",
            FailureKind::ConfigurationError => "configuration_error",
            FailureKind::InsufficientBalance => "insufficient_balance",
            FailureKind::Banned => "banned",
            FailureKind::BadRequest => "bad_request",
            FailureKind::Unknown => "unknown",
        }
    }

    /// A short human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            FailureKind::NetworkError => "Network connection error",
            FailureKind::Timeout => "Operation timed out",
            FailureKind::RateLimit => "Rate limit exceeded",
            FailureKind::ResourceLock => "Resource lock or contention",
            FailureKind::TransientUpstream => "Temporary upstream service error",
            FailureKind::ValidationError => "Data validation error",
            FailureKind::LogicError => "Programming logic error",
            FailureKind::NotFound => "Required data not found",
            FailureKind::PermissionError => "Permission or authorization error",
            FailureKind::ConfigurationError => "Configuration error",
            FailureKind::InsufficientBalance => "Insufficient balance for operation",
            FailureKind::Banned => "Account banned or suspended",
            FailureKind::BadRequest => "Malformed request",
            FailureKind::Unknown => "Unknown error type",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = UnknownFailureKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownFailureKind(s.to_string()))
    }
}

/// Returned when parsing a name that is not a [`FailureKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown failure kind {0:?}")]
pub struct UnknownFailureKind(pub String);
