//! In-process write-event bus.
//!
//! Fan-out over unbounded tokio channels: every subscriber receives every
//! published event, in publish order. Subscribers whose receiver was dropped
//! are pruned on the next publish.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use vindex_types::WriteEvent;

/// Receiving half handed out by [`WriteEventBus::subscribe`].
pub type WriteEventReceiver = mpsc::UnboundedReceiver<WriteEvent>;

/// Publishes write events to every current subscriber.
#[derive(Debug, Clone, Default)]
pub struct WriteEventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<WriteEvent>>>>,
}

impl WriteEventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber. Only events published afterwards are seen.
    pub fn subscribe(&self) -> WriteEventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Delivers `event` to all live subscribers. Returns how many received it.
    pub fn publish(&self, event: WriteEvent) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(
            "Published write event {} for entity {} to {} subscriber(s)",
            event.id,
            event.entity_id,
            subscribers.len()
        );
        subscribers.len()
    }

    /// Number of subscribers still registered.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}
