use crate::CircuitState;
use chrono::{DateTime, Utc};
use job_safety_core::SafetyEvent;

/// Events emitted by a circuit breaker.
#[derive(Debug, Clone)]
pub enum CircuitEvent {
    /// The circuit moved between states.
    StateTransition {
        job_type: String,
        timestamp: DateTime<Utc>,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    /// A failure was added to the window.
    FailureRecorded {
        job_type: String,
        timestamp: DateTime<Utc>,
        state: CircuitState,
        failure_count: u64,
    },
    /// A success was recorded.
    SuccessRecorded {
        job_type: String,
        timestamp: DateTime<Utc>,
        state: CircuitState,
    },
    /// A retry was refused because the circuit is open.
    CallRejected {
        job_type: String,
        timestamp: DateTime<Utc>,
    },
    /// An operator authorized a recovery trial.
    OverrideSet {
        job_type: String,
        timestamp: DateTime<Utc>,
        user: String,
        reason: String,
    },
    /// All state was cleared.
    Reset {
        job_type: String,
        timestamp: DateTime<Utc>,
    },
}

impl SafetyEvent for CircuitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitEvent::StateTransition { .. } => "state_transition",
            CircuitEvent::FailureRecorded { .. } => "failure_recorded",
            CircuitEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitEvent::CallRejected { .. } => "call_rejected",
            CircuitEvent::OverrideSet { .. } => "override_set",
            CircuitEvent::Reset { .. } => "reset",
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CircuitEvent::StateTransition { timestamp, .. }
            | CircuitEvent::FailureRecorded { timestamp, .. }
            | CircuitEvent::SuccessRecorded { timestamp, .. }
            | CircuitEvent::CallRejected { timestamp, .. }
            | CircuitEvent::OverrideSet { timestamp, .. }
            | CircuitEvent::Reset { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            CircuitEvent::StateTransition { job_type, .. }
            | CircuitEvent::FailureRecorded { job_type, .. }
            | CircuitEvent::SuccessRecorded { job_type, .. }
            | CircuitEvent::CallRejected { job_type, .. }
            | CircuitEvent::OverrideSet { job_type, .. }
            | CircuitEvent::Reset { job_type, .. } => job_type,
        }
    }
}
