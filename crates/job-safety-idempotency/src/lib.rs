//! Exactly-once guards for job side effects.
//!
//! Retrying a failed job must never place the same order twice or write the
//! same ledger entry twice. This crate provides two guards, both built on the
//! atomic primitives of a [`Coordinator`](job_safety_core::Coordinator):
//!
//! - [`SideEffectGuard`] wraps one side effect inside a job. The effect is
//!   identified by an [`EffectKind`] and a deterministic entity id derived
//!   from its semantic parameters ([`generate_entity_id`]), so a retry of
//!   the same logical operation collides on the same key.
//! - [`IdempotencyGuard`] and [`RetryGuard`] skip whole job executions that
//!   already ran, keyed by an opaque idempotency key.
//!
//! ```rust
//! use job_safety_core::MemoryCoordinator;
//! use job_safety_idempotency::{order_entity_id, EffectKind, SideEffectGuard};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = SideEffectGuard::new(Arc::new(MemoryCoordinator::new()));
//! let entity = order_entity_id("BTC-USD", "buy", 0.25, Some(64_000.0));
//!
//! let outcome = guard
//!     .execute_once(&EffectKind::OrderPlacement, &entity, || async {
//!         // submit to the exchange
//!         Ok::<_, std::io::Error>("exchange-order-1".to_string())
//!     })
//!     .await?;
//! assert!(outcome.executed);
//! # Ok(())
//! # }
//! ```

mod effect;
mod error;
mod job_guard;
mod side_effect;

pub use effect::{
    generate_entity_id, order_entity_id, pnl_entity_id, position_entity_id, signal_entity_id,
    EffectKind,
};
pub use error::GuardError;
pub use job_guard::{
    ExecutionVerdict, IdempotencyGuard, RetryGuard, SkipReason, DEFAULT_JOB_TTL,
};
pub use side_effect::{
    ExecuteOutcome, SideEffectGuard, SideEffectGuardBuilder, SideEffectGuardConfig,
    DEFAULT_EFFECT_TTL,
};
