//! Typed event fan-out.
//!
//! Each component owns one `EventBus` per event type. Every listener gets its
//! own broadcast receiver, so a slow or dropped listener never affects the
//! others or the emitter.

use tokio::sync::broadcast;
use tracing::trace;

/// Default per-listener buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Broadcast-backed event channel for one event type.
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus where each listener buffers up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new listener. Only events emitted afterwards are received.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Emit an event to all listeners and return how many received it.
    ///
    /// Emitting with no listeners is not an error.
    pub fn emit(&self, event: E) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("No event listeners registered");
                0
            }
        }
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
