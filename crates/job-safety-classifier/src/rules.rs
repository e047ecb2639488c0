//! The built-in rule tables.
//!
//! Retryable rules are evaluated before permanent ones, and within a table
//! the first match wins, so order matters: `"ConnectTimeout"` is a timeout,
//! and `"503 Service Unavailable"` is a transient upstream error.

use job_safety_core::FailureKind;

pub(crate) const RETRYABLE: &[(&str, FailureKind)] = &[
    (
        r"ConnectionError|ConnectionRefused|ConnectionReset|ConnectionAborted|connection (refused|reset|aborted|closed)|broken pipe",
        FailureKind::NetworkError,
    ),
    (r"TimeoutError|timeout|timed out|deadline exceeded", FailureKind::Timeout),
    (
        r"\b429\b|rate.?limit|too many requests|throttl",
        FailureKind::RateLimit,
    ),
    (
        r"database is locked|OperationalError.*locked|deadlock|lock wait|could not obtain lock",
        FailureKind::ResourceLock,
    ),
    (
        r"TemporaryError|ServiceUnavailable|service unavailable|bad gateway|\b50[234]\b",
        FailureKind::TransientUpstream,
    ),
    (
        r"ConnectTimeout|ReadTimeout|RequestException|dns error|network is unreachable",
        FailureKind::NetworkError,
    ),
];

pub(crate) const PERMANENT: &[(&str, FailureKind)] = &[
    (
        r"insufficient (balance|funds|margin)|InsufficientFunds|not enough balance",
        FailureKind::InsufficientBalance,
    ),
    (
        r"\bbanned\b|suspended|account (is )?disabled",
        FailureKind::Banned,
    ),
    (r"BadRequest|bad request|\b400\b|malformed", FailureKind::BadRequest),
    (r"ValidationError|Invalid", FailureKind::ValidationError),
    (
        r"ValueError|TypeError|AttributeError|KeyError|IndexError|panicked at",
        FailureKind::LogicError,
    ),
    (r"NotFound|not found|\b404\b|DoesNotExist", FailureKind::NotFound),
    (
        r"PermissionError|permission denied|Forbidden|\b403\b|Unauthorized|\b401\b",
        FailureKind::PermissionError,
    ),
    (
        r"ConfigurationError|ImproperlyConfigured|misconfigured",
        FailureKind::ConfigurationError,
    ),
];
