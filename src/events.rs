//! In-process event bus (C3): fire-and-forget fan-out for committed writes.
//!
//! Mirrors the teacher's `tokio::sync::broadcast` wrapper, narrowed to the
//! single event spec.md requires. A listener added after a write has
//! committed never sees that write — there is no replay buffer.

use crate::models::Message;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum BusEvent {
    MessageCreated(Message),
}

pub struct EventBus {
    pub sender: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    /// Synchronous emission: every listener subscribed at the time of this
    /// call runs before `publish` returns, satisfying §5's ordering
    /// guarantee that a listener observing event N precedes the writer's
    /// return from `sendMessage`. A full subscriber queue (`Lagged`) only
    /// affects that one subscriber, never the writer.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }
}
