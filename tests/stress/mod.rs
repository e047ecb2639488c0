//! Stress tests for the job-safety components
//!
//! ## What We Test
//!
//! - **High volume**: hundreds of thousands of guarded executions
//! - **High concurrency**: many tasks racing for the same entity or circuit
//! - **State consistency**: exactly-once and threshold guarantees under load

pub mod circuitbreaker;
pub mod idempotency;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Utility: Track peak concurrent operations
pub struct ConcurrencyTracker {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn enter(&self) {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Route component logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
