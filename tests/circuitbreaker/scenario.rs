use job_safety_circuitbreaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use job_safety_core::{
    Alert, AlertKind, AlertSinks, BlockReason, FnListener, ManualClock, MemoryCoordinator,
    SharedCoordinator,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Harness {
    clock: Arc<ManualClock>,
    store: SharedCoordinator,
    alerts: Arc<Mutex<Vec<AlertKind>>>,
    transitions: Arc<Mutex<Vec<(CircuitState, CircuitState)>>>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        Self {
            store: Arc::new(MemoryCoordinator::with_clock(clock.clone())),
            clock,
            alerts: Arc::new(Mutex::new(Vec::new())),
            transitions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn breaker(&self, job_type: &str) -> CircuitBreaker {
        let alerts = Arc::clone(&self.alerts);
        let transitions = Arc::clone(&self.transitions);
        let mut sinks = AlertSinks::new();
        sinks.add(FnListener::new(move |alert: &Alert| {
            alerts.lock().unwrap().push(alert.kind);
        }));
        let config = CircuitBreakerConfig::builder()
            .clock(self.clock.clone())
            .alert_sinks(sinks)
            .on_state_transition(move |from, to| transitions.lock().unwrap().push((from, to)))
            .build();
        CircuitBreaker::new(Arc::clone(&self.store), job_type, config)
    }
}

#[tokio::test]
async fn outage_then_operator_recovery() {
    let harness = Harness::new();
    let breaker = harness.breaker("sync_balances");

    for _ in 0..9 {
        assert_eq!(breaker.record_failure().await.unwrap(), CircuitState::Closed);
        harness.clock.advance(Duration::from_secs(5));
    }
    assert!(breaker.can_retry().await.unwrap().is_allowed());

    assert_eq!(breaker.record_failure().await.unwrap(), CircuitState::Open);
    breaker.record_failure().await.unwrap();
    breaker.record_failure().await.unwrap();
    assert_eq!(breaker.failure_count().await.unwrap(), 12);

    let decision = breaker.can_retry().await.unwrap();
    assert_eq!(
        decision.reason(),
        Some(&BlockReason::CircuitOpen {
            job_type: "sync_balances".into()
        })
    );

    // an open circuit never closes on its own
    harness.clock.advance(Duration::from_secs(3 * 3600));
    assert_eq!(breaker.state().await.unwrap(), CircuitState::Open);
    assert!(!breaker.can_retry().await.unwrap().is_allowed());

    breaker
        .set_manual_override("alice", "exchange API restored")
        .await
        .unwrap();
    assert_eq!(breaker.state().await.unwrap(), CircuitState::HalfOpen);
    assert!(breaker.can_retry().await.unwrap().is_allowed());
    let authorized = breaker.manual_override().await.unwrap().unwrap();
    assert_eq!(authorized.user, "alice");
    assert_eq!(authorized.reason, "exchange API restored");

    assert_eq!(breaker.record_success().await.unwrap(), CircuitState::Closed);
    assert_eq!(breaker.failure_count().await.unwrap(), 0);
    assert!(!breaker.has_manual_override().await.unwrap());

    assert_eq!(
        *harness.transitions.lock().unwrap(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
    assert_eq!(
        *harness.alerts.lock().unwrap(),
        vec![AlertKind::CircuitOpened, AlertKind::ManualOverrideSet]
    );
}

#[tokio::test]
async fn failed_trial_reopens_and_needs_a_new_override() {
    let harness = Harness::new();
    let breaker = harness.breaker("place_order");

    for _ in 0..10 {
        breaker.record_failure().await.unwrap();
    }
    breaker.set_manual_override("bob", "retry once").await.unwrap();

    assert_eq!(breaker.record_failure().await.unwrap(), CircuitState::Open);
    assert!(!breaker.has_manual_override().await.unwrap());
    assert!(!breaker.can_retry().await.unwrap().is_allowed());
    assert!(harness
        .alerts
        .lock()
        .unwrap()
        .contains(&AlertKind::CircuitReopened));
}

#[tokio::test]
async fn failures_outside_the_window_do_not_count() {
    let harness = Harness::new();
    let breaker = harness.breaker("fetch_prices");

    for _ in 0..9 {
        breaker.record_failure().await.unwrap();
    }
    harness.clock.advance(Duration::from_secs(301));

    assert_eq!(breaker.record_failure().await.unwrap(), CircuitState::Closed);
    assert_eq!(breaker.failure_count().await.unwrap(), 1);
}

#[tokio::test]
async fn job_types_have_independent_circuits() {
    let harness = Harness::new();
    let orders = harness.breaker("place_order");
    let prices = harness.breaker("fetch_prices");

    for _ in 0..10 {
        orders.record_failure().await.unwrap();
    }

    assert_eq!(orders.state().await.unwrap(), CircuitState::Open);
    assert_eq!(prices.state().await.unwrap(), CircuitState::Closed);
    assert!(prices.can_retry().await.unwrap().is_allowed());

    let status = orders.status().await.unwrap();
    assert_eq!(status.job_type, "place_order");
    assert_eq!(status.failure_threshold, 10);
    assert_eq!(status.time_window, Duration::from_secs(300));
    assert!(!status.can_retry);

    orders.reset().await.unwrap();
    assert_eq!(orders.state().await.unwrap(), CircuitState::Closed);
    assert_eq!(orders.failure_count().await.unwrap(), 0);
}
