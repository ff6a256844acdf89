//! In-process `tokio::sync::mpsc`-backed event bus: the filesystem-only
//! single-process deployment's transport, also used throughout tests.

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;

use crate::events::{Event, EventBus};

pub struct MemoryEventBus {
    tx: Sender<Event>,
    rx: Mutex<Receiver<Event>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx: Mutex::new(rx) }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: Event) {
        // A full channel means the worker pool is saturated; dropping
        // the event here would silently lose reconciliation work, so
        // block the publisher instead of using try_send.
        let _ = self.tx.send(event).await;
    }

    async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    #[tokio::test]
    async fn publish_then_recv_round_trips() {
        let bus = MemoryEventBus::new();
        bus.publish(Event::new(EventType::Update, "bucket/path")).await;
        let event = bus.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Update);
        assert_eq!(event.object_id, "bucket/path");
    }
}
