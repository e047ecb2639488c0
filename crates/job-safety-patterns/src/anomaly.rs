use crate::RetryWindow;
use chrono::{DateTime, Utc};
use job_safety_core::{log_alert_sinks, system_clock, Alert, AlertKind, AlertSinks, SharedClock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Something unhealthy about a closed retry window.
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// The window stayed open longer than the threshold.
    LongWindow { duration: Duration, threshold: Duration },
    /// The job needed more attempts than the threshold.
    ExcessiveAttempts { attempts: u32, threshold: u32 },
    /// Too many of all observed jobs needed a retry.
    HighRetryRate { rate: f64, threshold: f64 },
}

impl Anomaly {
    pub fn as_str(&self) -> &'static str {
        match self {
            Anomaly::LongWindow { .. } => "long_window",
            Anomaly::ExcessiveAttempts { .. } => "excessive_attempts",
            Anomaly::HighRetryRate { .. } => "high_retry_rate",
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::LongWindow { duration, threshold } => write!(
                f,
                "Long retry window: {:.2}s (threshold: {}s)",
                duration.as_secs_f64(),
                threshold.as_secs_f64()
            ),
            Anomaly::ExcessiveAttempts { attempts, threshold } => {
                write!(f, "Excessive attempts: {attempts} (threshold: {threshold})")
            }
            Anomaly::HighRetryRate { rate, threshold } => write!(
                f,
                "High retry rate: {:.2}% (threshold: {:.2}%)",
                rate * 100.0,
                threshold * 100.0
            ),
        }
    }
}

/// Running totals of a [`RetryAnomalyDetector`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AnomalyStats {
    pub total_jobs: u64,
    pub retried_jobs: u64,
    /// `retried_jobs / total_jobs`, 0 before any job.
    pub retry_rate: f64,
    pub long_windows: u64,
    pub excessive_attempts: u64,
    pub high_retry_rate_threshold: f64,
    #[cfg_attr(feature = "serde", serde(serialize_with = "crate::serialize_secs"))]
    pub long_window_threshold: Duration,
    pub excessive_attempts_threshold: u32,
}

#[derive(Debug, Default)]
struct Totals {
    total_jobs: u64,
    retried_jobs: u64,
    long_windows: u64,
    excessive_attempts: u64,
    last_alert_at: HashMap<&'static str, DateTime<Utc>>,
}

/// Flags unhealthy retry windows as they close.
///
/// Each anomaly found is also raised as a [`AlertKind::RetryAnomaly`] alert,
/// at most once per alert cooldown for each kind of anomaly. The returned
/// anomalies are not rate limited.
pub struct RetryAnomalyDetector {
    high_retry_rate_threshold: f64,
    long_window_threshold: Duration,
    excessive_attempts_threshold: u32,
    min_samples: u64,
    alert_cooldown: Duration,
    alert_sinks: AlertSinks,
    clock: SharedClock,
    totals: Mutex<Totals>,
}

impl RetryAnomalyDetector {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RetryAnomalyDetectorBuilder {
        RetryAnomalyDetectorBuilder::new()
    }

    /// Records a closed window and returns the anomalies it shows.
    pub fn record_window(&self, window: &RetryWindow) -> Vec<Anomaly> {
        let now = self.clock.now();
        let mut anomalies = Vec::new();
        let mut to_alert = Vec::new();
        {
            let mut totals = self.totals.lock().unwrap_or_else(|p| p.into_inner());
            totals.total_jobs += 1;
            if window.attempt_count > 1 {
                totals.retried_jobs += 1;
            }

            if let Some(duration) = window.duration() {
                if duration > self.long_window_threshold {
                    totals.long_windows += 1;
                    anomalies.push(Anomaly::LongWindow {
                        duration,
                        threshold: self.long_window_threshold,
                    });
                }
            }

            if window.attempt_count > self.excessive_attempts_threshold {
                totals.excessive_attempts += 1;
                anomalies.push(Anomaly::ExcessiveAttempts {
                    attempts: window.attempt_count,
                    threshold: self.excessive_attempts_threshold,
                });
            }

            if totals.total_jobs >= self.min_samples {
                let rate = totals.retried_jobs as f64 / totals.total_jobs as f64;
                if rate > self.high_retry_rate_threshold {
                    anomalies.push(Anomaly::HighRetryRate {
                        rate,
                        threshold: self.high_retry_rate_threshold,
                    });
                }
            }

            for anomaly in &anomalies {
                let due = totals
                    .last_alert_at
                    .get(anomaly.as_str())
                    .map_or(true, |&at| elapsed(at, now) >= self.alert_cooldown);
                if due {
                    totals.last_alert_at.insert(anomaly.as_str(), now);
                    to_alert.push(anomaly);
                }
            }
        }

        for anomaly in to_alert {
            let alert = Alert::new(
                AlertKind::RetryAnomaly,
                &window.job_id,
                anomaly.to_string(),
                now,
            )
            .with_detail("anomaly", anomaly.as_str())
            .with_detail("attempts", window.attempt_count);
            self.alert_sinks.emit(&alert);
        }
        anomalies
    }

    pub fn stats(&self) -> AnomalyStats {
        let totals = self.totals.lock().unwrap_or_else(|p| p.into_inner());
        AnomalyStats {
            total_jobs: totals.total_jobs,
            retried_jobs: totals.retried_jobs,
            retry_rate: if totals.total_jobs == 0 {
                0.0
            } else {
                totals.retried_jobs as f64 / totals.total_jobs as f64
            },
            long_windows: totals.long_windows,
            excessive_attempts: totals.excessive_attempts,
            high_retry_rate_threshold: self.high_retry_rate_threshold,
            long_window_threshold: self.long_window_threshold,
            excessive_attempts_threshold: self.excessive_attempts_threshold,
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

impl Default for RetryAnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryAnomalyDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAnomalyDetector")
            .field("high_retry_rate_threshold", &self.high_retry_rate_threshold)
            .field("long_window_threshold", &self.long_window_threshold)
            .field("excessive_attempts_threshold", &self.excessive_attempts_threshold)
            .field("min_samples", &self.min_samples)
            .field("alert_cooldown", &self.alert_cooldown)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RetryAnomalyDetector`].
pub struct RetryAnomalyDetectorBuilder {
    high_retry_rate_threshold: f64,
    long_window_threshold: Duration,
    excessive_attempts_threshold: u32,
    min_samples: u64,
    alert_cooldown: Duration,
    alert_sinks: AlertSinks,
    clock: SharedClock,
}

impl RetryAnomalyDetectorBuilder {
    /// Creates a builder with default values.
    ///
    /// Defaults:
    /// - high_retry_rate_threshold: 0.5
    /// - long_window_threshold: 1 hour
    /// - excessive_attempts_threshold: 10
    /// - min_samples: 10 (before the retry rate is judged)
    /// - alert_cooldown: 5 minutes per anomaly kind
    /// - alerts go to the log
    pub fn new() -> Self {
        Self {
            high_retry_rate_threshold: 0.5,
            long_window_threshold: Duration::from_secs(3600),
            excessive_attempts_threshold: 10,
            min_samples: 10,
            alert_cooldown: Duration::from_secs(300),
            alert_sinks: log_alert_sinks(),
            clock: system_clock(),
        }
    }

    /// Share of retried jobs (0.0 to 1.0) above which the rate is anomalous.
    pub fn high_retry_rate_threshold(mut self, threshold: f64) -> Self {
        self.high_retry_rate_threshold = threshold;
        self
    }

    pub fn long_window_threshold(mut self, threshold: Duration) -> Self {
        self.long_window_threshold = threshold;
        self
    }

    pub fn excessive_attempts_threshold(mut self, threshold: u32) -> Self {
        self.excessive_attempts_threshold = threshold;
        self
    }

    pub fn min_samples(mut self, samples: u64) -> Self {
        self.min_samples = samples.max(1);
        self
    }

    /// Minimum time between two alerts for the same kind of anomaly.
    pub fn alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.alert_cooldown = cooldown;
        self
    }

    /// Replaces the alert sinks.
    pub fn alert_sinks(mut self, sinks: AlertSinks) -> Self {
        self.alert_sinks = sinks;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RetryAnomalyDetector {
        RetryAnomalyDetector {
            high_retry_rate_threshold: self.high_retry_rate_threshold,
            long_window_threshold: self.long_window_threshold,
            excessive_attempts_threshold: self.excessive_attempts_threshold,
            min_samples: self.min_samples,
            alert_cooldown: self.alert_cooldown,
            alert_sinks: self.alert_sinks,
            clock: self.clock,
            totals: Mutex::new(Totals::default()),
        }
    }
}

impl Default for RetryAnomalyDetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
