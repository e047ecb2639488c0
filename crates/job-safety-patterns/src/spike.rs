use chrono::{DateTime, Utc};
use job_safety_core::{log_alert_sinks, system_clock, Alert, AlertKind, AlertSinks, SharedClock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// A burst of retries well above the baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySpike {
    /// Retries in the current window.
    pub current: usize,
    /// Mean retries per window over recent samples.
    pub baseline: f64,
    /// `baseline * multiplier`.
    pub threshold: f64,
    pub window: Duration,
}

impl fmt::Display for RetrySpike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Retry spike detected: {} retries in {}s (baseline: {:.1}, threshold: {:.1})",
            self.current,
            self.window.as_secs(),
            self.baseline,
            self.threshold
        )
    }
}

/// Current state of a [`RetrySpikeDetector`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SpikeStats {
    pub current_rate: usize,
    pub baseline_rate: Option<f64>,
    #[cfg_attr(feature = "serde", serde(serialize_with = "crate::serialize_secs"))]
    pub window: Duration,
    pub multiplier: f64,
    pub threshold_rate: Option<f64>,
}

#[derive(Debug, Default)]
struct SpikeState {
    events: VecDeque<DateTime<Utc>>,
    samples: VecDeque<usize>,
    last_sample_at: Option<DateTime<Utc>>,
    baseline: Option<f64>,
    last_alert_at: Option<DateTime<Utc>>,
}

impl SpikeState {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = now - window;
        while self.events.front().is_some_and(|&at| at < cutoff) {
            self.events.pop_front();
        }
    }
}

/// Detects sudden jumps in retry volume.
///
/// Keeps the retry timestamps of a sliding window and a baseline: the mean
/// window count over the last few samples, taken at most once per sample
/// interval. A retry that pushes the window count above
/// `baseline * multiplier` is a spike. The current count is compared with
/// the baseline before it is sampled, so a burst cannot raise its own bar.
///
/// Spikes are raised as [`AlertKind::RetrySpike`] alerts, at most once per
/// alert cooldown.
pub struct RetrySpikeDetector {
    name: String,
    window: Duration,
    multiplier: f64,
    baseline_samples: usize,
    min_baseline_samples: usize,
    sample_interval: Duration,
    alert_cooldown: Duration,
    alert_sinks: AlertSinks,
    clock: SharedClock,
    state: Mutex<SpikeState>,
}

impl RetrySpikeDetector {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RetrySpikeDetectorBuilder {
        RetrySpikeDetectorBuilder::new()
    }

    /// Records one retry and returns the spike it completes, if any.
    pub fn record_retry(&self) -> Option<RetrySpike> {
        let now = self.clock.now();
        let (spike, alert) = {
            let mut state = self.lock();
            state.events.push_back(now);
            state.prune(now, self.window);
            let current = state.events.len();

            let spike = state.baseline.and_then(|baseline| {
                let threshold = baseline * self.multiplier;
                (current as f64 > threshold).then(|| RetrySpike {
                    current,
                    baseline,
                    threshold,
                    window: self.window,
                })
            });

            let sample_due = state
                .last_sample_at
                .map_or(true, |at| elapsed(at, now) >= self.sample_interval);
            if sample_due {
                state.samples.push_back(current);
                while state.samples.len() > self.baseline_samples {
                    state.samples.pop_front();
                }
                state.last_sample_at = Some(now);
                if state.samples.len() >= self.min_baseline_samples {
                    let sum: usize = state.samples.iter().sum();
                    state.baseline = Some(sum as f64 / state.samples.len() as f64);
                }
            }

            let alert = spike.is_some()
                && state
                    .last_alert_at
                    .map_or(true, |at| elapsed(at, now) >= self.alert_cooldown);
            if alert {
                state.last_alert_at = Some(now);
            }
            (spike, alert)
        };

        if let (Some(spike), true) = (&spike, alert) {
            let alert = Alert::new(AlertKind::RetrySpike, &self.name, spike.to_string(), now)
                .with_detail("current", spike.current)
                .with_detail("baseline", format!("{:.1}", spike.baseline))
                .with_detail("window_seconds", self.window.as_secs());
            self.alert_sinks.emit(&alert);
        }
        spike
    }

    /// Retries in the current window.
    pub fn current_rate(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        state.prune(now, self.window);
        state.events.len()
    }

    pub fn stats(&self) -> SpikeStats {
        let current_rate = self.current_rate();
        let baseline_rate = self.lock().baseline;
        SpikeStats {
            current_rate,
            baseline_rate,
            window: self.window,
            multiplier: self.multiplier,
            threshold_rate: baseline_rate.map(|b| b * self.multiplier),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpikeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for RetrySpikeDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetrySpikeDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySpikeDetector")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("multiplier", &self.multiplier)
            .field("baseline_samples", &self.baseline_samples)
            .field("sample_interval", &self.sample_interval)
            .finish_non_exhaustive()
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

/// Builder for [`RetrySpikeDetector`].
pub struct RetrySpikeDetectorBuilder {
    name: String,
    window: Duration,
    multiplier: f64,
    baseline_samples: usize,
    min_baseline_samples: usize,
    sample_interval: Duration,
    alert_cooldown: Duration,
    alert_sinks: AlertSinks,
    clock: SharedClock,
}

impl RetrySpikeDetectorBuilder {
    /// Creates a builder with default values.
    ///
    /// Defaults:
    /// - name: `retry_spike`
    /// - window: 5 minutes
    /// - multiplier: 3.0
    /// - baseline_samples: 12
    /// - min_baseline_samples: 3
    /// - sample_interval: 60 seconds
    /// - alert_cooldown: 5 minutes
    pub fn new() -> Self {
        Self {
            name: "retry_spike".to_string(),
            window: Duration::from_secs(300),
            multiplier: 3.0,
            baseline_samples: 12,
            min_baseline_samples: 3,
            sample_interval: Duration::from_secs(60),
            alert_cooldown: Duration::from_secs(300),
            alert_sinks: log_alert_sinks(),
            clock: system_clock(),
        }
    }

    /// Names the detector in alerts.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// How many window counts the baseline averages over.
    pub fn baseline_samples(mut self, samples: usize) -> Self {
        self.baseline_samples = samples.max(1);
        self
    }

    pub fn min_baseline_samples(mut self, samples: usize) -> Self {
        self.min_baseline_samples = samples.max(1);
        self
    }

    /// Minimum time between two baseline samples.
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

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

    pub fn build(self) -> RetrySpikeDetector {
        RetrySpikeDetector {
            name: self.name,
            window: self.window,
            multiplier: self.multiplier,
            baseline_samples: self.baseline_samples,
            min_baseline_samples: self.min_baseline_samples.min(self.baseline_samples),
            sample_interval: self.sample_interval,
            alert_cooldown: self.alert_cooldown,
            alert_sinks: self.alert_sinks,
            clock: self.clock,
            state: Mutex::new(SpikeState::default()),
        }
    }
}

impl Default for RetrySpikeDetectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
