//! The job handle contract consumed from the job queue.
//!
//! The queue owns job identity, arguments and scheduling. This crate only
//! reads and writes a handful of metadata keys on the job and asks the queue
//! to commit them with [`JobHandle::save_meta`].

use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata keys written by the job-safety components.
pub mod meta_keys {
    /// Number of retry attempts recorded so far.
    pub const RETRY_ATTEMPTS: &str = "retry_attempts";
    /// RFC 3339 timestamp of the most recent retry attempt.
    pub const LAST_RETRY_AT: &str = "last_retry_at";
    /// RFC 3339 timestamp of the first recorded failure.
    pub const FIRST_FAILED_AT: &str = "first_failed_at";
    /// Job-level idempotency key.
    pub const IDEMPOTENCY_KEY: &str = "idempotency_key";
    /// Per-job override of the retry ceiling.
    pub const CUSTOM_MAX_RETRIES: &str = "custom_max_retries";
    /// Set when the job was skipped as a duplicate.
    pub const SKIPPED: &str = "skipped";
    /// Why the job was skipped.
    pub const SKIP_REASON: &str = "skip_reason";
}

use meta_keys::*;

/// A job's mutable, string-keyed metadata bag.
///
/// Keys this crate does not know about are preserved untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobMeta {
    values: BTreeMap<String, Value>,
}

impl JobMeta {
    /// Creates an empty metadata bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a raw value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Sets a raw value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Removes a raw value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Iterates over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Number of retry attempts recorded so far (0 if unset).
    pub fn retry_attempts(&self) -> u32 {
        self.get_u32(RETRY_ATTEMPTS).unwrap_or(0)
    }

    pub fn set_retry_attempts(&mut self, attempts: u32) {
        self.insert(RETRY_ATTEMPTS, attempts);
    }

    /// When the last retry attempt was recorded.
    pub fn last_retry_at(&self) -> Option<DateTime<Utc>> {
        self.get_time(LAST_RETRY_AT)
    }

    pub fn set_last_retry_at(&mut self, at: Option<DateTime<Utc>>) {
        self.set_time(LAST_RETRY_AT, at);
    }

    /// When the job first failed.
    pub fn first_failed_at(&self) -> Option<DateTime<Utc>> {
        self.get_time(FIRST_FAILED_AT)
    }

    pub fn set_first_failed_at(&mut self, at: Option<DateTime<Utc>>) {
        self.set_time(FIRST_FAILED_AT, at);
    }

    /// The per-job retry ceiling, if one was set.
    pub fn custom_max_retries(&self) -> Option<u32> {
        self.get_u32(CUSTOM_MAX_RETRIES)
    }

    pub fn set_custom_max_retries(&mut self, max: u32) {
        self.insert(CUSTOM_MAX_RETRIES, max);
    }

    /// The job-level idempotency key, if one was recorded.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.get(IDEMPOTENCY_KEY).and_then(Value::as_str)
    }

    pub fn set_idempotency_key(&mut self, key: impl Into<String>) {
        self.insert(IDEMPOTENCY_KEY, key.into());
    }

    /// Whether the job was skipped as a duplicate.
    pub fn skipped(&self) -> bool {
        self.get(SKIPPED).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Why the job was skipped.
    pub fn skip_reason(&self) -> Option<&str> {
        self.get(SKIP_REASON).and_then(Value::as_str)
    }

    /// Flags the job as skipped.
    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.insert(SKIPPED, true);
        self.insert(SKIP_REASON, reason.into());
    }

    fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key)
            .and_then(Value::as_u64)
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
    }

    fn get_time(&self, key: &str) -> Option<DateTime<Utc>> {
        let raw = self.get(key)?.as_str()?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!(key, value = raw, error = %e, "ignoring unparsable job timestamp");
                None
            }
        }
    }

    fn set_time(&mut self, key: &str, at: Option<DateTime<Utc>>) {
        let value = at.map_or(Value::Null, |at| Value::String(at.to_rfc3339()));
        self.values.insert(key.to_string(), value);
    }
}

impl FromIterator<(String, Value)> for JobMeta {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// A job as seen by the job-safety components.
///
/// Implement this as an adapter over the real job-queue type. Mutations
/// made through [`meta_mut`](JobHandle::meta_mut) are only durable once
/// [`save_meta`](JobHandle::save_meta) succeeds.
#[async_trait]
pub trait JobHandle: Send + Sync {
    /// The queue's job id.
    fn id(&self) -> &str;

    /// The name of the function the job runs.
    fn func_name(&self) -> &str;

    /// A printable rendering of the positional arguments.
    fn args_repr(&self) -> String;

    /// A printable rendering of the keyword arguments.
    fn kwargs_repr(&self) -> String;

    /// The job's metadata.
    fn meta(&self) -> &JobMeta;

    /// Mutable access to the job's metadata.
    fn meta_mut(&mut self) -> &mut JobMeta;

    /// Commits metadata mutations back to the queue.
    async fn save_meta(&mut self) -> Result<(), StoreError>;
}

/// A self-contained [`JobHandle`], useful for tests and for queues that
/// hand over plain values.
#[derive(Debug, Clone)]
pub struct InMemoryJob {
    id: String,
    func_name: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    meta: JobMeta,
    committed: JobMeta,
    saves: usize,
}

impl InMemoryJob {
    /// Creates a job with no arguments and empty metadata.
    pub fn new(id: impl Into<String>, func_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            func_name: func_name.into(),
            args: Vec::new(),
            kwargs: BTreeMap::new(),
            meta: JobMeta::new(),
            committed: JobMeta::new(),
            saves: 0,
        }
    }

    /// Adds a positional argument.
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Adds a keyword argument.
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Starts from the given metadata, as if it had been loaded from the queue.
    pub fn with_meta(mut self, meta: JobMeta) -> Self {
        self.committed = meta.clone();
        self.meta = meta;
        self
    }

    /// Metadata as of the last successful [`save_meta`](JobHandle::save_meta).
    pub fn committed_meta(&self) -> &JobMeta {
        &self.committed
    }

    /// How many times metadata has been committed.
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

#[async_trait]
impl JobHandle for InMemoryJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn func_name(&self) -> &str {
        &self.func_name
    }

    fn args_repr(&self) -> String {
        Value::Array(self.args.clone()).to_string()
    }

    fn kwargs_repr(&self) -> String {
        serde_json::to_string(&self.kwargs).unwrap_or_default()
    }

    fn meta(&self) -> &JobMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut JobMeta {
        &mut self.meta
    }

    async fn save_meta(&mut self) -> Result<(), StoreError> {
        self.committed = self.meta.clone();
        self.saves += 1;
        Ok(())
    }
}
