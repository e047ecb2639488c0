//! Property tests for the circuit breaker.
//!
//! Invariants tested:
//! - The circuit opens exactly when the window holds `failure_threshold` failures
//! - An open circuit refuses retries until an override is set
//! - A trial success always closes the circuit and clears the window

use job_safety_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use job_safety_core::{AlertSinks, ManualClock, MemoryCoordinator};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const WINDOW_SECS: u64 = 300;

/// Whether failures spaced `gap` seconds apart ever fill the window to `threshold`.
fn expect_open(threshold: u64, failures: usize, gap: u64) -> bool {
    (0..failures).any(|i| {
        let in_window = (0..=i).filter(|&j| ((i - j) as u64) * gap < WINDOW_SECS).count();
        in_window as u64 >= threshold
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: opening depends only on failures inside the window
    #[test]
    fn opens_at_threshold_within_window(
        threshold in 1u64..=12,
        failures in 0usize..=30,
        // none of these divide the window, so no failure sits exactly on its edge
        gap in prop::sample::select(vec![0u64, 7, 11, 13, 17, 23, 31, 41, 61, 97]),
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let clock = Arc::new(ManualClock::starting_now());
            let config = CircuitBreakerConfig::builder()
                .failure_threshold(threshold)
                .time_window(Duration::from_secs(WINDOW_SECS))
                .alert_sinks(AlertSinks::new())
                .clock(clock.clone())
                .build();
            let breaker = CircuitBreaker::new(
                Arc::new(MemoryCoordinator::with_clock(clock.clone())),
                "place_order",
                config,
            );

            for _ in 0..failures {
                breaker.record_failure().await.unwrap();
                clock.advance(Duration::from_secs(gap));
            }

            let opened = expect_open(threshold, failures, gap);
            let state = breaker.state().await.unwrap();
            prop_assert_eq!(state == CircuitState::Open, opened);
            prop_assert_eq!(breaker.can_retry().await.unwrap().is_allowed(), !opened);

            if opened {
                breaker.set_manual_override("ops", "trial").await.unwrap();
                prop_assert!(breaker.can_retry().await.unwrap().is_allowed());
                prop_assert_eq!(breaker.record_success().await.unwrap(), CircuitState::Closed);
                prop_assert_eq!(breaker.failure_count().await.unwrap(), 0);
            }
            Ok(())
        })?;
    }
}
