//! Audit trail of job retry decisions.
//!
//! Every retry the system makes, and every retry an operator evaluates with
//! a dry run, is written as an immutable [`RetryAuditRecord`]. Records land
//! in one JSON-lines file per day and can be read back with
//! [`RetryAuditLogger::history`] or summarized with [`RetryAuditLogger::stats`].
//!
//! ```rust,no_run
//! use job_safety_audit::{HistoryFilter, RetryAttempt, RetryAuditLogger};
//! use job_safety_core::{FailureKind, InMemoryJob};
//!
//! # fn example() -> Result<(), job_safety_audit::AuditError> {
//! let audit = RetryAuditLogger::new("logs/job_retry_audit")?;
//! let job = InMemoryJob::new("job-42", "place_order");
//!
//! audit.log_attempt(&job, RetryAttempt::new("exchange timeout", FailureKind::Timeout));
//! audit.log_dry_run(&job, "manual check", FailureKind::Timeout, "alice");
//! audit.flush()?;
//!
//! for record in audit.history(&HistoryFilter::all().job("job-42"))? {
//!     println!("{} attempt {} dry_run={}", record.timestamp, record.attempt_number, record.dry_run);
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod logger;
mod record;

pub use error::AuditError;
pub use logger::{RetryAuditLogger, RetryAuditLoggerBuilder};
pub use record::{AuditStats, HistoryFilter, RetryAttempt, RetryAuditRecord};
