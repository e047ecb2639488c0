//! Operational alerts.
//!
//! The circuit breaker and the retry-pattern detectors raise [`Alert`]s.
//! Sinks are ordinary event listeners, so paging integrations plug in the
//! same way as any other listener. [`LogAlertSink`] is the default.

use crate::events::{EventListener, EventListeners, SafetyEvent};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    /// A circuit breaker tripped open.
    CircuitOpened,
    /// A trial failed while half-open and the circuit re-opened.
    CircuitReopened,
    /// An operator authorised a recovery trial.
    ManualOverrideSet,
    /// A closed retry window looked unhealthy.
    RetryAnomaly,
    /// Retry volume jumped well above baseline.
    RetrySpike,
}

impl AlertKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::CircuitOpened => "circuit_opened",
            AlertKind::CircuitReopened => "circuit_reopened",
            AlertKind::ManualOverrideSet => "manual_override_set",
            AlertKind::RetryAnomaly => "retry_anomaly",
            AlertKind::RetrySpike => "retry_spike",
        }
    }

    /// How loudly the alert should be raised.
    pub fn severity(self) -> Severity {
        match self {
            AlertKind::CircuitOpened | AlertKind::CircuitReopened => Severity::Critical,
            AlertKind::ManualOverrideSet | AlertKind::RetryAnomaly | AlertKind::RetrySpike => {
                Severity::Warning
            }
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Critical,
}

/// An alert raised by a job-safety component.
#[derive(Debug, Clone)]
pub struct Alert {
    /// What happened.
    pub kind: AlertKind,
    /// Which component instance raised it (job type, detector name).
    pub source: String,
    /// Operator-facing message.
    pub message: String,
    /// Extra key/value context.
    pub details: BTreeMap<String, String>,
    /// When it was raised.
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        source: impl Into<String>,
        message: impl Into<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            source: source.into(),
            message: message.into(),
            details: BTreeMap::new(),
            raised_at,
        }
    }

    /// Attaches a piece of context.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

impl SafetyEvent for Alert {
    fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.raised_at
    }

    fn source(&self) -> &str {
        &self.source
    }
}

/// The set of sinks alerts are delivered to.
pub type AlertSinks = EventListeners<Alert>;

/// Writes alerts to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

impl EventListener<Alert> for LogAlertSink {
    fn on_event(&self, alert: &Alert) {
        match alert.kind.severity() {
            Severity::Critical => tracing::error!(
                alert = alert.kind.as_str(),
                source = %alert.source,
                details = ?alert.details,
                "ALERT: {}",
                alert.message
            ),
            Severity::Warning => tracing::warn!(
                alert = alert.kind.as_str(),
                source = %alert.source,
                details = ?alert.details,
                "ALERT: {}",
                alert.message
            ),
        }
    }
}

/// Alert sinks that only log.
pub fn log_alert_sinks() -> AlertSinks {
    let mut sinks = AlertSinks::new();
    sinks.add(LogAlertSink);
    sinks
}
