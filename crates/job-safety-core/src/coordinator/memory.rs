use super::{Coordinator, MarkOutcome};
use crate::clock::{system_clock, SharedClock};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Sorted(BTreeMap<String, f64>),
    List(VecDeque<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }
}

/// An in-process [`Coordinator`].
///
/// Every operation takes one lock, so operations are atomic with respect to
/// each other. Expired keys are dropped lazily when next touched, using the
/// coordinator's clock, which lets tests expire keys with a
/// [`ManualClock`](crate::ManualClock) instead of sleeping.
pub struct MemoryCoordinator {
    entries: Mutex<HashMap<String, Entry>>,
    clock: SharedClock,
}

impl MemoryCoordinator {
    /// Creates an empty coordinator driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Creates an empty coordinator driven by `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every key.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(ttl?).ok()?;
        self.clock.now().checked_add_signed(ttl)
    }

    /// Locks the map and purges `key` if it has expired.
    fn fresh(&self, key: &str) -> MutexGuard<'_, HashMap<String, Entry>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            entries.remove(key);
        }
        entries
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCoordinator")
            .field("keys", &self.lock().len())
            .field("clock", &self.clock)
            .finish()
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

fn sorted<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> Result<Option<&'a mut BTreeMap<String, f64>>, StoreError> {
    match entries.get_mut(key) {
        None => Ok(None),
        Some(Entry {
            value: Value::Sorted(set),
            ..
        }) => Ok(Some(set)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn in_range(score: f64, min: f64, max: f64) -> bool {
    score >= min && score <= max
}

/// Resolves Redis-style inclusive, possibly negative, list indices.
fn list_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let expires_at = self.expiry(ttl);
        let mut entries = self.fresh(key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = self.expiry(ttl);
        self.fresh(key).insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.fresh(key).get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.fresh(key).remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.fresh(key).contains_key(key))
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut entries = self.fresh(key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Str("0".to_string())));
        let Value::Str(raw) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let current: i64 = raw
            .parse()
            .map_err(|_| StoreError::corrupt(key, "value is not an integer"))?;
        let next = current
            .checked_add(by)
            .ok_or_else(|| StoreError::corrupt(key, "increment would overflow"))?;
        *raw = next.to_string();
        Ok(next)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .fresh(key)
            .get(key)
            .and_then(|e| e.expires_at)
            .and_then(|at| (at - now).to_std().ok()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let expires_at = self.expiry(Some(ttl));
        match self.fresh(key).get_mut(key) {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut entries = self.fresh(key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Sorted(BTreeMap::new())));
        let Value::Sorted(set) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        set.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, StoreError> {
        let mut entries = self.fresh(key);
        let Some(set) = sorted(&mut entries, key)? else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|_, score| !in_range(*score, min, max));
        let removed = (before - set.len()) as u64;
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        let mut entries = self.fresh(key);
        Ok(sorted(&mut entries, key)?.map_or(0, |set| {
            set.values().filter(|s| in_range(**s, min, max)).count() as u64
        }))
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let mut entries = self.fresh(key);
        Ok(sorted(&mut entries, key)?.map_or(0, |set| set.len() as u64))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<String>, StoreError> {
        let mut entries = self.fresh(key);
        let Some(set) = sorted(&mut entries, key)? else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, f64)> = set
            .iter()
            .filter(|(_, s)| in_range(**s, min, max))
            .map(|(m, s)| (m, *s))
            .collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entries = self.fresh(key);
        let Some(set) = sorted(&mut entries, key)? else {
            return Ok(false);
        };
        let removed = set.remove(member).is_some();
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn push_capped(&self, key: &str, value: &str, cap: usize) -> Result<(), StoreError> {
        let mut entries = self.fresh(key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
        let Value::List(list) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        list.push_back(value.to_string());
        while list.len() > cap {
            list.pop_front();
        }
        if list.is_empty() {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        match self.fresh(key).get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list_bounds(list.len(), start, stop)
                .map(|(from, to)| list.range(from..=to).cloned().collect())
                .unwrap_or_default()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.fresh(key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(BTreeMap::new())));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        hash.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        match self.fresh(key).get(key) {
            None => Ok(BTreeMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut entries = self.fresh(key);
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(BTreeMap::new())));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let raw = hash.entry(field.to_string()).or_insert_with(|| "0".to_string());
        let current: i64 = raw
            .parse()
            .map_err(|_| StoreError::corrupt(key, format!("field {field:?} is not an integer")))?;
        let next = current
            .checked_add(by)
            .ok_or_else(|| StoreError::corrupt(key, "increment would overflow"))?;
        *raw = next.to_string();
        Ok(next)
    }

    async fn check_and_mark(
        &self,
        key: &str,
        placeholder: &str,
        ttl: Duration,
    ) -> Result<MarkOutcome, StoreError> {
        let expires_at = self.expiry(Some(ttl));
        let mut entries = self.fresh(key);
        match entries.get(key) {
            Some(Entry {
                value: Value::Str(existing),
                ..
            }) => Ok(MarkOutcome::Existing(Some(existing.clone()))),
            Some(_) => Ok(MarkOutcome::Existing(None)),
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Str(placeholder.to_string()),
                        expires_at,
                    },
                );
                Ok(MarkOutcome::Marked)
            }
        }
    }
}
