//! Observer hooks for endpoint wrappers.
//!
//! A wrapper reports what it does (connect attempts, recoveries, rejected
//! calls) to the listeners registered on it. Any `Fn(&E)` closure is a
//! listener; implement [`EventListener`] directly for stateful observers.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Something an endpoint wrapper reports about itself.
pub trait EndpointEvent: Send + Sync + fmt::Debug {
    /// Short snake_case tag, stable enough for log fields and metric labels.
    fn event_type(&self) -> &'static str;

    fn timestamp(&self) -> Instant;

    /// Name of the wrapper instance, normally the wrapped method name.
    fn endpoint_name(&self) -> &str;
}

/// Receives events from one wrapper. Runs on the task that produced the event.
pub trait EventListener<E: EndpointEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

impl<E, F> EventListener<E> for F
where
    E: EndpointEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        self(event)
    }
}

/// The listeners registered on one wrapper, shared by its clones.
pub struct EventListeners<E: EndpointEvent> {
    listeners: Vec<Arc<dyn EventListener<E>>>,
}

impl<E: EndpointEvent> EventListeners<E> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Registers `listener`; listeners run in registration order.
    pub fn add<L>(&mut self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners.push(Arc::new(listener));
    }

    /// Hands `event` to every listener, synchronously.
    ///
    /// A listener that panics is skipped over; the rest still run.
    pub fn emit(&self, event: &E) {
        for listener in &self.listeners {
            let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event)
            }));

            if caught.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    endpoint = event.endpoint_name(),
                    event = event.event_type(),
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

impl<E: EndpointEvent> Clone for EventListeners<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<E: EndpointEvent> Default for EventListeners<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EndpointEvent> fmt::Debug for EventListeners<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}
