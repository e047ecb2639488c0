//! Retry-pattern analysis.
//!
//! Where the metrics crate counts individual retries, this crate looks at
//! how jobs retry over time:
//!
//! - [`RetryWindowTracker`] follows each job from its first retry to its
//!   final outcome, mirroring open windows to the coordinator so a restarted
//!   worker can pick them up again.
//! - [`RetryHistogram`] buckets closed windows by attempt count.
//! - [`RetryAnomalyDetector`] flags windows that ran too long or needed too
//!   many attempts, and a fleet-wide retry ratio that is too high.
//! - [`RetrySpikeDetector`] flags sudden bursts of retries against a rolling
//!   baseline.
//!
//! Detectors raise [`Alert`](job_safety_core::Alert)s through the same sinks
//! as the circuit breaker.
//!
//! ```rust
//! use job_safety_core::MemoryCoordinator;
//! use job_safety_patterns::{RetryAnomalyDetector, RetryHistogram, RetryWindowTracker};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let tracker = RetryWindowTracker::new(Arc::new(MemoryCoordinator::new()));
//! let detector = RetryAnomalyDetector::new();
//! let mut histogram = RetryHistogram::new();
//!
//! tracker.increment_attempt("job-42").await;
//! tracker.increment_attempt("job-42").await;
//! if let Some(window) = tracker.close_window("job-42", true).await {
//!     histogram.record_window(&window);
//!     for anomaly in detector.record_window(&window) {
//!         println!("{anomaly}");
//!     }
//! }
//! # }
//! ```
//!
//! ## Feature Flags
//! - `serde`: enables `Serialize` for windows, buckets and detector stats

mod anomaly;
mod histogram;
mod spike;
mod window;

pub use anomaly::{Anomaly, AnomalyStats, RetryAnomalyDetector, RetryAnomalyDetectorBuilder};
pub use histogram::{AttemptBucket, RetryHistogram};
pub use spike::{RetrySpike, RetrySpikeDetector, RetrySpikeDetectorBuilder, SpikeStats};
pub use window::{RetryWindow, RetryWindowTracker, RetryWindowTrackerBuilder};

#[cfg(feature = "serde")]
pub(crate) fn serialize_secs<S: serde::Serializer>(
    value: &std::time::Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}
