use crate::{AuditError, AuditStats, HistoryFilter, RetryAttempt, RetryAuditRecord};
use chrono::NaiveDate;
use job_safety_core::{system_clock, FailureKind, JobHandle, SharedClock};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const SHARD_PREFIX: &str = "retry_audit_";
const SHARD_SUFFIX: &str = ".jsonl";

/// Durable log of every retry decision.
///
/// Records are buffered in memory and appended in batches to one JSON-lines
/// shard per UTC calendar day (`retry_audit_YYYYMMDD.jsonl`). The buffer is
/// flushed when it reaches capacity, on [`flush`](Self::flush) and when the
/// logger is dropped.
///
/// Write failures never abort the caller: a failed flush is logged and the
/// records stay buffered for the next one.
pub struct RetryAuditLogger {
    dir: PathBuf,
    capacity: usize,
    buffer: Mutex<Vec<RetryAuditRecord>>,
    clock: SharedClock,
}

impl RetryAuditLogger {
    /// Creates a logger writing to `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AuditError> {
        Self::builder().dir(dir).build()
    }

    pub fn builder() -> RetryAuditLoggerBuilder {
        RetryAuditLoggerBuilder::new()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The shard file that holds records of `date`.
    pub fn shard_path(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{SHARD_PREFIX}{}{SHARD_SUFFIX}", date.format("%Y%m%d")))
    }

    /// Records currently waiting for a flush.
    pub fn pending(&self) -> usize {
        self.lock_buffer().len()
    }

    /// Logs one retry attempt of `job`, flushing on the calling thread once
    /// the buffer is full.
    pub fn log_attempt<J: JobHandle + ?Sized>(&self, job: &J, attempt: RetryAttempt) {
        if self.buffer_attempt(job, attempt) {
            if let Err(e) = self.flush() {
                tracing::error!(error = %e, "failed to flush retry audit records");
            }
        }
    }

    /// Buffers one retry attempt of `job` without touching the disk.
    ///
    /// Returns `true` when the buffer has reached capacity and the caller
    /// should [`flush`](Self::flush). Async callers use this to move the
    /// file writes off the executor.
    pub fn buffer_attempt<J: JobHandle + ?Sized>(&self, job: &J, attempt: RetryAttempt) -> bool {
        let record = RetryAuditRecord::capture(job, attempt, self.clock.now());
        tracing::info!(
            job_id = %record.job_id,
            attempt = record.attempt_number,
            reason = %record.reason,
            dry_run = record.dry_run,
            "logged retry audit"
        );

        let mut buffer = self.lock_buffer();
        buffer.push(record);
        buffer.len() >= self.capacity
    }

    /// Logs a retry that was evaluated but not requeued.
    pub fn log_dry_run<J: JobHandle + ?Sized>(
        &self,
        job: &J,
        reason: &str,
        failure_kind: FailureKind,
        initiator: &str,
    ) {
        self.log_attempt(
            job,
            RetryAttempt::new(reason, failure_kind)
                .initiator(initiator)
                .dry_run(true),
        );
    }

    /// Appends buffered records to their shards and returns how many were written.
    ///
    /// Calling it with an empty buffer is a no-op. On error the unwritten
    /// records are put back at the front of the buffer.
    pub fn flush(&self) -> Result<usize, AuditError> {
        let mut buffer = self.lock_buffer();
        if buffer.is_empty() {
            return Ok(0);
        }

        let mut shards: BTreeMap<NaiveDate, Vec<RetryAuditRecord>> = BTreeMap::new();
        for record in buffer.drain(..) {
            shards
                .entry(record.timestamp.date_naive())
                .or_default()
                .push(record);
        }

        let mut written = 0;
        let mut shards = shards.into_iter();
        while let Some((date, records)) = shards.next() {
            if let Err(e) = self.append_shard(date, &records) {
                let mut unwritten = records;
                unwritten.extend(shards.flat_map(|(_, rest)| rest));
                *buffer = unwritten;
                return Err(e);
            }
            written += records.len();
            tracing::info!(count = records.len(), shard = %self.shard_path(date).display(), "flushed audit records");
        }
        Ok(written)
    }

    /// Reads back records matching `filter`, oldest first.
    ///
    /// Records still waiting in the buffer are included. Lines that do not
    /// parse are skipped with a warning.
    pub fn history(&self, filter: &HistoryFilter) -> Result<Vec<RetryAuditRecord>, AuditError> {
        let mut records = Vec::new();
        for (date, path) in self.shards()? {
            if filter.start.is_some_and(|s| date < s.date_naive())
                || filter.end.is_some_and(|e| date > e.date_naive())
            {
                continue;
            }
            read_shard(&path, filter, &mut records)?;
        }

        records.extend(
            self.lock_buffer()
                .iter()
                .filter(|r| filter.matches(r))
                .cloned(),
        );
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    /// Aggregates over the whole trail.
    pub fn stats(&self) -> Result<AuditStats, AuditError> {
        let records = self.history(&HistoryFilter::all())?;
        Ok(AuditStats::from_records(&records))
    }

    fn append_shard(&self, date: NaiveDate, records: &[RetryAuditRecord]) -> Result<(), AuditError> {
        let mut batch = String::new();
        for record in records {
            batch.push_str(&serde_json::to_string(record)?);
            batch.push('\n');
        }

        let path = self.shard_path(date);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AuditError::io(&path, e))?;
        file.write_all(batch.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| AuditError::io(&path, e))
    }

    fn shards(&self) -> Result<Vec<(NaiveDate, PathBuf)>, AuditError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| AuditError::io(&self.dir, e))?;
        let mut shards = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AuditError::io(&self.dir, e))?;
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(shard_date) else {
                continue;
            };
            shards.push((date, entry.path()));
        }
        shards.sort();
        Ok(shards)
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, Vec<RetryAuditRecord>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RetryAuditLogger {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(error = %e, "failed to flush retry audit records on shutdown");
        }
    }
}

impl fmt::Debug for RetryAuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAuditLogger")
            .field("dir", &self.dir)
            .field("capacity", &self.capacity)
            .field("pending", &self.pending())
            .finish()
    }
}

fn shard_date(file_name: &str) -> Option<NaiveDate> {
    let stamp = file_name
        .strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_SUFFIX)?;
    NaiveDate::parse_from_str(stamp, "%Y%m%d").ok()
}

fn read_shard(
    path: &Path,
    filter: &HistoryFilter,
    out: &mut Vec<RetryAuditRecord>,
) -> Result<(), AuditError> {
    let file = fs::File::open(path).map_err(|e| AuditError::io(path, e))?;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AuditError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RetryAuditRecord>(&line) {
            Ok(record) if filter.matches(&record) => out.push(record),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(shard = %path.display(), line = lineno + 1, error = %e, "skipping unreadable audit record");
            }
        }
    }
    Ok(())
}

/// Builder for a [`RetryAuditLogger`].
pub struct RetryAuditLoggerBuilder {
    dir: PathBuf,
    capacity: usize,
    clock: SharedClock,
}

impl RetryAuditLoggerBuilder {
    /// Creates a builder with default values.
    ///
    /// Defaults:
    /// - dir: `logs/job_retry_audit`
    /// - buffer_capacity: 100
    pub fn new() -> Self {
        Self {
            dir: PathBuf::from("logs/job_retry_audit"),
            capacity: 100,
            clock: system_clock(),
        }
    }

    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Sets how many records are buffered before an automatic flush.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Creates the log directory and the logger.
    pub fn build(self) -> Result<RetryAuditLogger, AuditError> {
        fs::create_dir_all(&self.dir).map_err(|e| AuditError::io(&self.dir, e))?;
        Ok(RetryAuditLogger {
            dir: self.dir,
            capacity: self.capacity,
            buffer: Mutex::new(Vec::new()),
            clock: self.clock,
        })
    }
}

impl Default for RetryAuditLoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
