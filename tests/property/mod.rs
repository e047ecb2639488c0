//! Property-based tests for the job-safety components.

pub mod circuit_breaker;
pub mod classifier;
pub mod idempotency;
