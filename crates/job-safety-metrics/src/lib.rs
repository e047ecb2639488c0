//! Retry metrics shared across workers.
//!
//! [`RetryMetrics`] keeps its counters in the coordinator, so every worker
//! process contributes to the same totals. It answers the operational
//! questions about retries (how often, how successful, how often refused)
//! and renders them for Prometheus scraping:
//!
//! ```rust
//! use job_safety_core::MemoryCoordinator;
//! use job_safety_metrics::RetryMetrics;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), job_safety_core::StoreError> {
//! let metrics = RetryMetrics::new(Arc::new(MemoryCoordinator::new()));
//!
//! metrics.record_attempt("place_order", 1).await;
//! metrics.record_success("place_order").await;
//! metrics.record_blocked("sync_balances", "circuit_open").await;
//!
//! let snapshot = metrics.snapshot(Duration::from_secs(3600)).await?;
//! assert_eq!(snapshot.total_retries, 1);
//!
//! let text = metrics.export_prometheus().await?;
//! assert!(text.contains("retry_total_blocks 1"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//! - `metrics`: also reports every recorded event through the `metrics`
//!   facade (`job_retry_attempts_total`, `job_retry_outcomes_total`,
//!   `job_retry_blocked_total`), for processes that already run a recorder
//! - `serde`: enables `Serialize` for [`MetricsSnapshot`] and [`JobTypeMetrics`]

#[cfg(feature = "metrics")]
use metrics::describe_counter;
#[cfg(feature = "metrics")]
use std::sync::Once;

mod prometheus;
mod recorder;
mod snapshot;

pub use prometheus::render as render_prometheus;
pub use recorder::{RetryMetrics, RetryMetricsBuilder};
pub use snapshot::{JobTypeMetrics, MetricsSnapshot};

#[cfg(feature = "metrics")]
static METRICS_INIT: Once = Once::new();

pub(crate) fn describe_metrics() {
    #[cfg(feature = "metrics")]
    METRICS_INIT.call_once(|| {
        describe_counter!(
            "job_retry_attempts_total",
            "Total number of job retry attempts"
        );
        describe_counter!(
            "job_retry_outcomes_total",
            "Total number of retry outcomes by result"
        );
        describe_counter!(
            "job_retry_blocked_total",
            "Total number of retries refused, by reason"
        );
    });
}
