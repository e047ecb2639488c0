//! Shared infrastructure for the job-safety crates.
//!
//! This crate holds what every retry-reliability component needs:
//!
//! - [`Coordinator`]: the atomic key-value primitives all cross-process
//!   state is built on, with an in-memory implementation and a Redis one
//!   behind the `redis` feature.
//! - [`JobHandle`] and [`JobMeta`]: the narrow view of a queued job that the
//!   components read and write.
//! - [`FailureKind`], [`RetryDecision`] and [`BlockReason`]: the shared
//!   vocabulary for classification and retry gating.
//! - [`Clock`]: injectable wall-clock time.
//! - Event and alert plumbing ([`EventListeners`], [`Alert`]).
//!
//! Most users depend on the `job-safety` facade crate instead of this one.

mod alert;
pub mod clock;
pub mod coordinator;
mod decision;
mod error;
pub mod events;
mod job;
mod kind;

pub use alert::{log_alert_sinks, Alert, AlertKind, AlertSinks, LogAlertSink, Severity};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use coordinator::{Coordinator, MarkOutcome, MemoryCoordinator, SharedCoordinator};
#[cfg(feature = "redis")]
pub use coordinator::RedisCoordinator;
pub use decision::{BlockReason, RetryDecision};
pub use error::StoreError;
pub use events::{BoxedEventListener, EventListener, EventListeners, FnListener, SafetyEvent};
pub use job::{meta_keys, InMemoryJob, JobHandle, JobMeta};
pub use kind::{FailureKind, UnknownFailureKind};
