//! The shared key-value coordinator.
//!
//! Worker processes share no memory, so every piece of cross-process state
//! (idempotency marks, circuit failure windows, retry counters) lives in a
//! [`Coordinator`]. The trait exposes the small set of atomic primitives the
//! job-safety components are built on: conditional writes with TTL, atomic
//! counters, time-scored sorted sets, capped lists and hashes.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryCoordinator`] keeps everything in a mutex-guarded map. It is
//!   atomic within one process and honours TTLs through an injected clock,
//!   which makes it the natural choice for tests.
//! - `RedisCoordinator` (feature `redis`) talks to a Redis server.

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryCoordinator;
#[cfg(feature = "redis")]
pub use self::redis::RedisCoordinator;

use crate::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of [`Coordinator::check_and_mark`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The key was absent and now holds the placeholder. The caller owns it.
    Marked,
    /// The key already existed. Carries its value, if it could be read.
    Existing(Option<String>),
}

impl MarkOutcome {
    /// Returns `true` if this caller won the mark.
    pub fn is_marked(&self) -> bool {
        matches!(self, MarkOutcome::Marked)
    }
}

/// Atomic primitives over a shared key-value store.
///
/// Every method is a single atomic step with respect to every other caller
/// of the same store. Sorted-set scores are epoch seconds.
#[async_trait]
pub trait Coordinator: Send + Sync + fmt::Debug {
    /// Writes `value` only if `key` does not exist. Returns whether it was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Writes `value` unconditionally, replacing any TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Reads a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes a key of any type. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Adds `by` to an integer value, creating it at zero. Returns the new value.
    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError>;

    /// Remaining time to live, or `None` if the key is missing or persistent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Sets a TTL on an existing key. Returns `false` if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Adds or re-scores a sorted-set member.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;

    /// Removes members with `min <= score <= max`. Returns how many went.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<u64, StoreError>;

    /// Counts members with `min <= score <= max`.
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError>;

    /// Counts all members.
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// Members with `min <= score <= max`, lowest score first.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<Vec<String>, StoreError>;

    /// Removes one sorted-set member. Returns whether it was present.
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Appends to a list and keeps only the newest `cap` entries.
    async fn push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StoreError>;

    /// Reads list entries `start..=stop`, oldest first. Negative indices
    /// count from the end, as in Redis `LRANGE`.
    async fn list_range(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, StoreError>;

    /// Sets one hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Reads a whole hash.
    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;

    /// Adds `by` to an integer hash field. Returns the new value.
    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    /// If `key` exists, returns its value; otherwise stores `placeholder`
    /// with `ttl`. One atomic step.
    async fn check_and_mark(
        &self,
        key: &str,
        placeholder: &str,
        ttl: Duration,
    ) -> Result<MarkOutcome, StoreError>;
}

/// A coordinator shared between components.
pub type SharedCoordinator = Arc<dyn Coordinator>;
