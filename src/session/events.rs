//! Typed queue for pushed provider events.
//!
//! Provider callbacks only enqueue; the driver drains the queue on its own
//! schedule. One channel carries every kind, so per-kind order is the push
//! order.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::provider::types::{EventHandler, EventKind, ProviderEvent};

pub struct EventQueue {
    tx: mpsc::UnboundedSender<ProviderEvent>,
    rx: mpsc::UnboundedReceiver<ProviderEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Callback to register with the provider for `kind`.
    ///
    /// Events of any other kind delivered through it are dropped. The handler
    /// reports false once the queue has been dropped.
    pub fn handler_for(&self, kind: EventKind) -> EventHandler {
        let tx = self.tx.clone();
        Arc::new(move |event: ProviderEvent| {
            if event.kind() != kind {
                tracing::warn!(
                    expected = kind.as_str(),
                    got = event.kind().as_str(),
                    "Provider delivered event to the wrong handler"
                );
                return !tx.is_closed();
            }
            // Receiver lives as long as the queue; a failed send means the driver is gone.
            tx.send(event).is_ok()
        })
    }

    /// Next queued event. The queue keeps a sender, so this only waits.
    pub async fn recv(&mut self) -> Option<ProviderEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProviderEvent> {
        self.rx.try_recv().ok()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
