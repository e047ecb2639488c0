//! Event plumbing shared by the job-safety components.
//!
//! Components publish typed events (circuit transitions, alerts) to a set of
//! listeners. A listener that panics is isolated from the others and from the
//! caller's retry decision.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// An event published by a job-safety component.
pub trait SafetyEvent: Send + Sync + fmt::Debug {
    /// A short name for the kind of event (e.g. `"state_transition"`).
    fn event_type(&self) -> &'static str;

    /// When the event happened.
    fn timestamp(&self) -> DateTime<Utc>;

    /// The component instance that produced it, usually a job type.
    fn source(&self) -> &str;
}

/// Receives events of type `E`.
pub trait EventListener<E: SafetyEvent>: Send + Sync {
    /// Called once per published event.
    fn on_event(&self, event: &E);
}

/// A shared, type-erased listener.
pub type BoxedEventListener<E> = Arc<dyn EventListener<E>>;

/// An ordered collection of listeners.
#[derive(Clone)]
pub struct EventListeners<E: SafetyEvent> {
    listeners: Vec<BoxedEventListener<E>>,
}

impl<E: SafetyEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers a listener.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Registers an already shared listener.
    pub fn add_shared(&mut self, listener: BoxedEventListener<E>) {
        self.listeners.push(listener);
    }

    /// Delivers `event` to every listener in registration order.
    ///
    /// A panicking listener is logged and skipped; the rest still run.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let delivered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));
            if delivered.is_err() {
                tracing::error!(
                    event_type = event.event_type(),
                    source = event.source(),
                    "event listener panicked"
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl<E: SafetyEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: SafetyEvent> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

/// A listener backed by a closure.
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _event: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _event: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: SafetyEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}
