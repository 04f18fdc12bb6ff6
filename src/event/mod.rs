//! Event system for async hub observation.
//!
//! The event system is the hub's diagnostic channel: state changes, decoded
//! readings and connection failures are broadcast to any number of
//! subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::connection::ConnectionState;
use crate::types::DeviceReading;

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection state machine moved to a new state.
    StateChanged(ConnectionState),
    /// A frame decoded successfully and was published to the sinks.
    Reading(DeviceReading),
    /// A connection attempt failed; a retry is scheduled.
    ///
    /// Reported once per failure streak, not once per retry.
    ConnectionFailed { message: String, retry_in_ms: u64 },
    /// The device does not expose the expected GATT layout; no retry is
    /// scheduled until the device is signalled available again.
    SessionAborted { message: String },
}

/// Discriminant of an [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    Reading,
    ConnectionFailed,
    SessionAborted,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateChanged(_) => EventKind::StateChanged,
            Self::Reading(_) => EventKind::Reading,
            Self::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            Self::SessionAborted { .. } => EventKind::SessionAborted,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone. Events missed because
    /// the subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter for a specific connection state.
    pub state: Option<ConnectionState>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            state: None,
        }
    }

    /// Creates a filter for entering a specific connection state.
    #[must_use]
    pub fn state(state: ConnectionState) -> Self {
        Self {
            kinds: Some(vec![EventKind::StateChanged]),
            state: Some(state),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(expected) = self.state {
            if let Event::StateChanged(state) = event {
                if *state != expected {
                    return false;
                }
            } else {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let receiver = self.inner.sender.subscribe();
        Subscription { receiver }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed. Only
    /// events dispatched after this call are considered.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter.matches(&event) {
                            return Some(event);
                        }
                    } else {
                        return None;
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.inner.sender.receiver_count())
            .finish()
    }
}
