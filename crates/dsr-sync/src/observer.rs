//! Change notification fan-out.
//!
//! Events are emitted only after the store lock has been released, so
//! callbacks may read the replica freely.

use dsr_graph::GraphEvent;
use parking_lot::RwLock;
use tokio::sync::broadcast;

type Callback = Box<dyn Fn(&GraphEvent) + Send + Sync>;

/// Delivers graph events to registered callbacks and broadcast subscribers.
pub struct EventBus {
    callbacks: RwLock<Vec<Callback>>,
    event_tx: broadcast::Sender<GraphEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            callbacks: RwLock::new(Vec::new()),
            event_tx,
        }
    }

    /// Run `callback` for every future event, on the emitting task.
    pub fn on_event(&self, callback: impl Fn(&GraphEvent) + Send + Sync + 'static) {
        self.callbacks.write().push(Box::new(callback));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.event_tx.subscribe()
    }

    pub fn emit(&self, events: &[GraphEvent]) {
        if events.is_empty() {
            return;
        }
        let callbacks = self.callbacks.read();
        for event in events {
            for callback in callbacks.iter() {
                callback(event);
            }
            // No subscribers is fine.
            let _ = self.event_tx.send(event.clone());
        }
    }
}
