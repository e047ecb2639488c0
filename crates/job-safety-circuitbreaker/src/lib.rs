//! Per-job-type circuit breaker for retried jobs.
//!
//! When a class of jobs keeps failing (an exchange is down, a credential was
//! revoked) retrying each job independently only adds load and noise. A
//! [`CircuitBreaker`] counts failures of one job type in a sliding time
//! window and, once the count reaches the threshold, blocks every retry of
//! that type until an operator steps in.
//!
//! ## State machine
//!
//! ```text
//!            threshold reached                 set_manual_override
//!  CLOSED ─────────────────────────▶ OPEN ───────────────────────────▶ HALF_OPEN
//!    ▲                                 ▲                                   │
//!    │                                 └──── failure (trial failed) ───────┤
//!    └──────────────────────────── success ────────────────────────────────┘
//! ```
//!
//! There is no time-based recovery. An open circuit stays open until
//! [`CircuitBreaker::set_manual_override`] authorizes a trial.
//!
//! ## Basic Example
//!
//! ```rust
//! use job_safety_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerManager, CircuitState};
//! use job_safety_core::MemoryCoordinator;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), job_safety_core::StoreError> {
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(10)
//!     .time_window(Duration::from_secs(300))
//!     .on_state_transition(|from, to| println!("circuit {from} -> {to}"))
//!     .build();
//! let manager = CircuitBreakerManager::with_config(Arc::new(MemoryCoordinator::new()), config);
//!
//! let breaker = manager.breaker("sync_balances");
//! if breaker.can_retry().await?.is_allowed() {
//!     // run the job, then report the outcome
//!     breaker.record_failure().await?;
//! }
//!
//! // later, from operator tooling
//! if breaker.state().await? == CircuitState::Open {
//!     breaker.set_manual_override("alice", "exchange maintenance finished").await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Tower integration
//!
//! [`CircuitGateLayer`] wraps a job-executing service so that refused calls
//! never reach it and outcomes are recorded automatically.
//!
//! ## Feature Flags
//! - `metrics`: emits `job_circuit_transitions_total`, `job_circuit_rejections_total`
//!   and the `job_circuit_state` gauge (0 closed, 1 half-open, 2 open)
//! - `serde`: enables `Serialize` for [`CircuitState`] and [`CircuitStatus`]

#[cfg(feature = "metrics")]
use metrics::{describe_counter, describe_gauge};
#[cfg(feature = "metrics")]
use std::sync::Once;

pub use circuit::{CircuitBreaker, ManualOverride};
pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use error::CircuitGateError;
pub use events::CircuitEvent;
pub use layer::{CircuitGate, CircuitGateLayer};
pub use manager::CircuitBreakerManager;
pub use state::{CircuitState, CircuitStatus, UnknownCircuitState};

mod circuit;
mod config;
mod error;
mod events;
mod layer;
mod manager;
mod state;

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

pub(crate) fn describe_metrics() {
    #[cfg(feature = "metrics")]
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "job_circuit_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_counter!(
            "job_circuit_rejections_total",
            "Total number of retries refused by an open circuit"
        );
        describe_gauge!(
            "job_circuit_state",
            "Current circuit state (0 closed, 1 half-open, 2 open)"
        );
    });
}
