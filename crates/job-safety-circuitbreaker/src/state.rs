use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The state of a job type's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Normal operation. Retries flow.
    #[default]
    Closed,
    /// Retries are blocked until an operator sets an override.
    Open,
    /// An operator authorized a recovery trial.
    HalfOpen,
}

impl CircuitState {
    /// The value stored in the coordinator.
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    #[cfg(feature = "metrics")]
    pub(crate) fn gauge_value(self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored state string that is not a circuit state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown circuit state: {0}")]
pub struct UnknownCircuitState(pub String);

impl FromStr for CircuitState {
    type Err = UnknownCircuitState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half_open" => Ok(CircuitState::HalfOpen),
            other => Err(UnknownCircuitState(other.to_string())),
        }
    }
}

/// A point-in-time view of one breaker, for dashboards.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CircuitStatus {
    pub job_type: String,
    pub state: CircuitState,
    /// Failures inside the current window.
    pub failure_count: u64,
    pub failure_threshold: u64,
    #[cfg_attr(feature = "serde", serde(with = "duration_secs"))]
    pub time_window: Duration,
    pub has_manual_override: bool,
    /// Whether a retry would be allowed right now.
    pub can_retry: bool,
}

#[cfg(feature = "serde")]
mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}
