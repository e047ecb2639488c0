//! Retry reliability for background jobs.
//!
//! `job-safety` makes retrying queued jobs safe when those jobs move money:
//! a retried order must not be placed twice, a broken upstream must not be
//! hammered by every worker, and every retry decision must be explainable
//! afterwards. Each concern is its own crate and a feature of this one.
//!
//! # Components
//!
//! - **Classifier** (`classifier` feature): maps an error description to a
//!   failure kind and decides whether it is worth retrying. Unknown errors
//!   are not retried.
//! - **Idempotency** (`idempotency` feature): exactly-once execution of side
//!   effects keyed by a deterministic entity id, and job-level deduplication.
//! - **Retry** (`retry` feature): per-job attempt ceiling with exponential
//!   cooldown, tracked in the job's metadata.
//! - **Circuit breaker** (`circuitbreaker` feature): per-job-type kill switch
//!   that opens after repeated failures and closes only after an operator
//!   authorizes a trial.
//! - **Audit** (`audit` feature): append-only daily JSONL trail of retries.
//! - **Metrics** (`metrics` feature): shared retry counters and rates, with
//!   Prometheus text export.
//! - **Patterns** (`patterns` feature): retry windows, attempt histograms,
//!   anomaly and spike detection.
//! - **Supervisor** (`supervisor` feature): [`RetrySupervisor`] runs a retry
//!   through all of the above.
//!
//! All cross-process state lives behind the [`Coordinator`](core::Coordinator)
//! trait: an in-memory implementation for tests and single-node deployments,
//! and Redis behind the `redis` feature.
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! job-safety = { version = "0.1", features = ["idempotency", "retry"] }
//! ```
//!
//! Or everything:
//!
//! ```toml
//! [dependencies]
//! job-safety = { version = "0.1", features = ["full"] }
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "supervisor")]
//! # {
//! use job_safety::core::{InMemoryJob, MemoryCoordinator};
//! use job_safety::idempotency::{order_entity_id, EffectKind};
//! use job_safety::RetrySupervisor;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let supervisor = RetrySupervisor::new(Arc::new(MemoryCoordinator::new()));
//! let guard = supervisor.side_effects();
//! let mut job = InMemoryJob::new("job-17", "place_order");
//!
//! let result = supervisor
//!     .run(&mut job, "orders", || async move {
//!         let entity = order_entity_id("BTCUSDT", "buy", 0.5, Some(64000.0));
//!         guard
//!             .execute_once(&EffectKind::OrderPlacement, &entity, || async {
//!                 Ok::<_, String>("order-991".to_string())
//!             })
//!             .await
//!             .map_err(|e| e.to_string())
//!     })
//!     .await;
//!
//! match result {
//!     Ok(outcome) => println!("order {:?}, executed now: {}", outcome.result, outcome.executed),
//!     Err(e) if e.is_blocked() => println!("not retried: {e}"),
//!     Err(e) => println!("retry failed: {e}"),
//! }
//! # }
//! # }
//! ```
//!
//! # Individual Crates
//!
//! Each component is also available on its own:
//!
//! - `job-safety-classifier`
//! - `job-safety-idempotency`
//! - `job-safety-retry`
//! - `job-safety-circuitbreaker`
//! - `job-safety-audit`
//! - `job-safety-metrics`
//! - `job-safety-patterns`
//! - `job-safety-core` (shared infrastructure)

// Re-export core (always available)
pub use job_safety_core as core;

// Re-export components based on features
#[cfg(feature = "audit")]
pub use job_safety_audit as audit;

#[cfg(feature = "circuitbreaker")]
pub use job_safety_circuitbreaker as circuitbreaker;

#[cfg(feature = "classifier")]
pub use job_safety_classifier as classifier;

#[cfg(feature = "idempotency")]
pub use job_safety_idempotency as idempotency;

#[cfg(feature = "metrics")]
pub use job_safety_metrics as metrics;

#[cfg(feature = "patterns")]
pub use job_safety_patterns as patterns;

#[cfg(feature = "retry")]
pub use job_safety_retry as retry;

#[cfg(feature = "supervisor")]
mod supervisor;

#[cfg(feature = "supervisor")]
pub use supervisor::{
    AttemptOutcome, Completion, RetrySupervisor, RetrySupervisorBuilder, SupervisorError,
    LAST_FAILURE_KIND,
};
