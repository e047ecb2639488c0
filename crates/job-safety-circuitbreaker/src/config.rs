use crate::events::CircuitEvent;
use crate::CircuitState;
use job_safety_core::{
    log_alert_sinks, system_clock, Alert, AlertSinks, EventListener, EventListeners, FnListener,
    SharedClock,
};
use std::fmt;
use std::time::Duration;

/// Configuration shared by the breakers of one or more job types.
///
/// The job type itself is not part of the configuration, so one config can
/// back every breaker a [`CircuitBreakerManager`](crate::CircuitBreakerManager)
/// creates.
pub struct CircuitBreakerConfig {
    pub(crate) failure_threshold: u64,
    pub(crate) time_window: Duration,
    pub(crate) alert_cooldown: Duration,
    pub(crate) namespace: String,
    pub(crate) reopen_on_trial_failure: bool,
    pub(crate) event_listeners: EventListeners<CircuitEvent>,
    pub(crate) alert_sinks: AlertSinks,
    pub(crate) clock: SharedClock,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn failure_threshold(&self) -> u64 {
        self.failure_threshold
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    pub fn alert_cooldown(&self) -> Duration {
        self.alert_cooldown
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn reopen_on_trial_failure(&self) -> bool {
        self.reopen_on_trial_failure
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfigBuilder::new().build()
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("time_window", &self.time_window)
            .field("alert_cooldown", &self.alert_cooldown)
            .field("namespace", &self.namespace)
            .field("reopen_on_trial_failure", &self.reopen_on_trial_failure)
            .field("event_listeners", &self.event_listeners)
            .field("alert_sinks", &self.alert_sinks)
            .finish_non_exhaustive()
    }
}

/// Builder for configuring and constructing a circuit breaker.
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: u64,
    time_window: Duration,
    alert_cooldown: Duration,
    namespace: String,
    reopen_on_trial_failure: bool,
    event_listeners: EventListeners<CircuitEvent>,
    alert_sinks: Option<AlertSinks>,
    clock: SharedClock,
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            failure_threshold: 10,
            time_window: Duration::from_secs(5 * 60),
            alert_cooldown: Duration::from_secs(300),
            namespace: "circuit_breaker".to_string(),
            reopen_on_trial_failure: true,
            event_listeners: EventListeners::new(),
            alert_sinks: None,
            clock: system_clock(),
        }
    }

    /// Sets how many failures inside the window open the circuit.
    ///
    /// Default: 10
    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets the sliding window over which failures are counted.
    ///
    /// Default: 5 minutes
    pub fn time_window(mut self, window: Duration) -> Self {
        self.time_window = window;
        self
    }

    /// Sets the minimum gap between two alerts from the same breaker.
    ///
    /// Default: 300 seconds
    pub fn alert_cooldown(mut self, cooldown: Duration) -> Self {
        self.alert_cooldown = cooldown;
        self
    }

    /// Sets the key prefix used in the coordinator.
    ///
    /// Default: `circuit_breaker`
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Whether a failure recorded while half-open reopens the circuit.
    ///
    /// When disabled, failed trials are only counted and the circuit stays
    /// half-open until a success closes it.
    ///
    /// Default: true
    pub fn reopen_on_trial_failure(mut self, reopen: bool) -> Self {
        self.reopen_on_trial_failure = reopen;
        self
    }

    /// Sets the clock used for failure timestamps.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the alert sinks.
    ///
    /// Default: a single sink that logs alerts through `tracing`
    pub fn alert_sinks(mut self, sinks: AlertSinks) -> Self {
        self.alert_sinks = Some(sinks);
        self
    }

    /// Adds an alert sink next to the defaults.
    pub fn alert_sink<L>(mut self, sink: L) -> Self
    where
        L: EventListener<Alert> + 'static,
    {
        self.alert_sinks
            .get_or_insert_with(log_alert_sinks)
            .add(sink);
        self
    }

    /// Registers a listener for every circuit event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a callback for state transitions.
    ///
    /// # Example
    ///
    /// ```rust
    /// use job_safety_circuitbreaker::{CircuitBreakerConfig, CircuitState};
    ///
    /// let config = CircuitBreakerConfig::builder()
    ///     .on_state_transition(|from, to| {
    ///         if to == CircuitState::Open {
    ///             eprintln!("circuit opened (was {from})");
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitEvent| {
                if let CircuitEvent::StateTransition {
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(*from_state, *to_state);
                }
            }));
        self
    }

    /// Registers a callback for retries refused by an open circuit.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &CircuitEvent| {
                if let CircuitEvent::CallRejected { job_type, .. } = event {
                    f(job_type);
                }
            }));
        self
    }

    pub fn build(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.max(1),
            time_window: self.time_window,
            alert_cooldown: self.alert_cooldown,
            namespace: self.namespace,
            reopen_on_trial_failure: self.reopen_on_trial_failure,
            event_listeners: self.event_listeners,
            alert_sinks: self.alert_sinks.unwrap_or_else(log_alert_sinks),
            clock: self.clock,
        }
    }
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
