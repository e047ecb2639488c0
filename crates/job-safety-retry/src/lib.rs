//! Retry limits and cooldowns for queued jobs.
//!
//! [`RetryPolicy`] answers "may this job be retried now?" from the retry
//! bookkeeping stored on the job itself (`retry_attempts`, `last_retry_at`,
//! `first_failed_at`, `custom_max_retries`). A job is blocked once it reaches
//! its retry ceiling, and while it is inside the cooldown that follows its
//! last attempt:
//!
//! ```text
//! cooldown(attempts) = min(cooldown * 2^attempts, max_cooldown)   // exponential
//! cooldown(attempts) = cooldown                                    // flat
//! ```
//!
//! ```rust
//! use job_safety_core::InMemoryJob;
//! use job_safety_retry::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), job_safety_core::StoreError> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .cooldown(Duration::from_secs(10))
//!     .build();
//!
//! let mut job = InMemoryJob::new("job-1", "sync_balances");
//! if policy.can_retry(&job).is_allowed() {
//!     policy.record_attempt(&mut job).await?;
//!     // requeue the job
//! }
//! # Ok(())
//! # }
//! ```

mod limits;
mod policy;

pub use limits::RetryLimits;
pub use policy::{RetryPolicy, RetryPolicyBuilder, RetryStatus};
