//! Integration tests for the side-effect and job-level guards.
//!
//! Test organization:
//! - race_storm.rs: many callers racing the same entity
//! - ttl_expiry.rs: marks expiring and re-arming
//! - job_guard.rs: job-level deduplication through the job handle

mod race_storm;
mod ttl_expiry;
