use chrono::{DateTime, Utc};
use job_safety_core::clock::{from_epoch_seconds, to_epoch_seconds};
use job_safety_core::{system_clock, SharedClock, SharedCoordinator, StoreError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

const STATUS_ACTIVE: &str = "active";
const STATUS_CLOSED: &str = "closed";

/// The span from a job's first retry to its resolution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RetryWindow {
    pub job_id: String,
    pub start_time: DateTime<Utc>,
    /// Set once the window closes.
    pub end_time: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub success: bool,
}

impl RetryWindow {
    fn open(job_id: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            start_time,
            end_time: None,
            attempt_count: 0,
            success: false,
        }
    }

    /// Time from start to end, `None` while the window is open.
    pub fn duration(&self) -> Option<Duration> {
        self.end_time
            .map(|end| (end - self.start_time).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Tracks open retry windows per job.
///
/// Windows live in process memory and are mirrored to the coordinator as a
/// hash at `{ns}:{job_id}` (24 hour TTL) plus an index of open windows at
/// `{ns}:active`. Mirroring is best effort; [`recover`](Self::recover)
/// reloads open windows after a restart.
///
/// Each tracker owns its in-memory windows. A tracker that sees a job it holds
/// no window for adopts the active mirrored window before opening a new one,
/// so a job that moves between workers keeps its start time and count.
/// Concurrent attempts of one job on two workers still keep separate local
/// counts; only the mirrored `attempt_count` is shared.
pub struct RetryWindowTracker {
    coordinator: SharedCoordinator,
    namespace: String,
    index_key: String,
    ttl: Duration,
    clock: SharedClock,
    active: Mutex<HashMap<String, RetryWindow>>,
}

impl RetryWindowTracker {
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self::builder(coordinator).build()
    }

    pub fn builder(coordinator: SharedCoordinator) -> RetryWindowTrackerBuilder {
        RetryWindowTrackerBuilder::new(coordinator)
    }

    /// Opens a window for `job_id`.
    ///
    /// Opening a window that is already open, here or in the coordinator,
    /// returns it unchanged.
    pub async fn start_window(&self, job_id: &str) -> RetryWindow {
        if self.window(job_id).is_none() {
            if let Some(adopted) = self.adopt_mirrored(job_id).await {
                return adopted;
            }
        }

        let (window, created) = {
            let mut active = self.lock();
            match active.get(job_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let window = RetryWindow::open(job_id, self.clock.now());
                    active.insert(job_id.to_string(), window.clone());
                    (window, true)
                }
            }
        };

        if !created {
            tracing::warn!(job_id, "retry window already open");
            return window;
        }

        tracing::debug!(job_id, "retry window opened");
        if let Err(e) = self.mirror_open(&window).await {
            tracing::warn!(job_id, error = %e, "failed to persist retry window");
        }
        window
    }

    /// Counts one more attempt, opening the window first if needed.
    ///
    /// Returns the new attempt count.
    pub async fn increment_attempt(&self, job_id: &str) -> u32 {
        if self.window(job_id).is_none() {
            self.adopt_mirrored(job_id).await;
        }

        let (window, created) = {
            let mut active = self.lock();
            let mut created = false;
            let window = active.entry(job_id.to_string()).or_insert_with(|| {
                created = true;
                RetryWindow::open(job_id, self.clock.now())
            });
            window.attempt_count += 1;
            (window.clone(), created)
        };

        let result = if created {
            self.mirror_open(&window).await
        } else {
            self.coordinator
                .hincr(&self.window_key(job_id), "attempt_count", 1)
                .await
                .map(|_| ())
        };
        if let Err(e) = result {
            tracing::warn!(job_id, error = %e, "failed to persist retry attempt");
        }
        window.attempt_count
    }

    /// Closes the window of `job_id` and returns it, or `None` if no window
    /// was open.
    pub async fn close_window(&self, job_id: &str, success: bool) -> Option<RetryWindow> {
        let mut window = self.lock().remove(job_id)?;
        window.end_time = Some(self.clock.now());
        window.success = success;

        tracing::debug!(
            job_id,
            success,
            attempts = window.attempt_count,
            "retry window closed"
        );
        if let Err(e) = self.mirror_close(&window).await {
            tracing::warn!(job_id, error = %e, "failed to persist closed retry window");
        }
        Some(window)
    }

    /// The open window of `job_id`.
    pub fn window(&self, job_id: &str) -> Option<RetryWindow> {
        self.lock().get(job_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Loads open windows persisted by earlier processes.
    ///
    /// Index entries whose hash expired or was closed are dropped from the
    /// index. Returns how many windows were loaded.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let job_ids = self
            .coordinator
            .zrange_by_score(&self.index_key, f64::MIN, f64::MAX)
            .await?;

        let mut recovered = 0;
        for job_id in job_ids {
            let Some(window) = self.load_open(&job_id).await? else {
                self.coordinator.zrem(&self.index_key, &job_id).await?;
                continue;
            };

            let mut active = self.lock();
            if !active.contains_key(&job_id) {
                active.insert(job_id, window);
                recovered += 1;
            }
        }

        if recovered > 0 {
            tracing::info!(recovered, "recovered open retry windows");
        }
        Ok(recovered)
    }

    /// Takes over the active mirrored window of `job_id`, if there is one.
    async fn adopt_mirrored(&self, job_id: &str) -> Option<RetryWindow> {
        let mirrored = match self.load_open(job_id).await {
            Ok(mirrored) => mirrored?,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "failed to load mirrored retry window");
                return None;
            }
        };
        let window = self
            .lock()
            .entry(job_id.to_string())
            .or_insert(mirrored)
            .clone();
        tracing::debug!(
            job_id,
            attempts = window.attempt_count,
            "adopted mirrored retry window"
        );
        Some(window)
    }

    /// The mirrored window of `job_id` if it is still active.
    async fn load_open(&self, job_id: &str) -> Result<Option<RetryWindow>, StoreError> {
        let key = self.window_key(job_id);
        let fields = self.coordinator.hget_all(&key).await?;
        if fields.get("status").map(String::as_str) != Some(STATUS_ACTIVE) {
            return Ok(None);
        }

        let start_time = fields
            .get("start_time")
            .and_then(|raw| raw.parse::<f64>().ok())
            .and_then(from_epoch_seconds)
            .ok_or_else(|| StoreError::corrupt(&key, "missing or invalid start_time"))?;
        let attempt_count = match fields.get("attempt_count") {
            None => 0,
            Some(raw) => raw
                .parse()
                .map_err(|_| StoreError::corrupt(&key, format!("not an attempt count: {raw}")))?,
        };

        let mut window = RetryWindow::open(job_id, start_time);
        window.attempt_count = attempt_count;
        Ok(Some(window))
    }

    async fn mirror_open(&self, window: &RetryWindow) -> Result<(), StoreError> {
        let key = self.window_key(&window.job_id);
        let start = to_epoch_seconds(window.start_time);
        self.coordinator
            .hset(&key, "start_time", &format!("{start:.6}"))
            .await?;
        self.coordinator
            .hset(&key, "attempt_count", &window.attempt_count.to_string())
            .await?;
        self.coordinator.hset(&key, "status", STATUS_ACTIVE).await?;
        self.coordinator.expire(&key, self.ttl).await?;
        self.coordinator
            .zadd(&self.index_key, &window.job_id, start)
            .await
    }

    async fn mirror_close(&self, window: &RetryWindow) -> Result<(), StoreError> {
        let key = self.window_key(&window.job_id);
        let end = window.end_time.map(to_epoch_seconds).unwrap_or_default();
        let duration = window.duration().unwrap_or_default().as_secs_f64();
        self.coordinator.hset(&key, "status", STATUS_CLOSED).await?;
        self.coordinator
            .hset(&key, "end_time", &format!("{end:.6}"))
            .await?;
        self.coordinator
            .hset(&key, "success", if window.success { "1" } else { "0" })
            .await?;
        self.coordinator
            .hset(&key, "duration", &format!("{duration:.3}"))
            .await?;
        self.coordinator.expire(&key, self.ttl).await?;
        self.coordinator.zrem(&self.index_key, &window.job_id).await?;
        Ok(())
    }

    fn window_key(&self, job_id: &str) -> String {
        format!("{}:{}", self.namespace, job_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RetryWindow>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for RetryWindowTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryWindowTracker")
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryWindowTracker`].
pub struct RetryWindowTrackerBuilder {
    coordinator: SharedCoordinator,
    namespace: String,
    ttl: Duration,
    clock: SharedClock,
}

impl RetryWindowTrackerBuilder {
    /// Defaults: namespace `retry_window`, 24 hour TTL.
    pub fn new(coordinator: SharedCoordinator) -> Self {
        Self {
            coordinator,
            namespace: "retry_window".to_string(),
            ttl: Duration::from_secs(24 * 3600),
            clock: system_clock(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// How long a mirrored window outlives its last update.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RetryWindowTracker {
        RetryWindowTracker {
            coordinator: self.coordinator,
            index_key: format!("{}:active", self.namespace),
            namespace: self.namespace,
            ttl: self.ttl,
            clock: self.clock,
            active: Mutex::new(HashMap::new()),
        }
    }
}
