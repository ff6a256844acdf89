//! The event-driven reconciliation layer (§4.G): `update`/`refresh`/
//! `processed`/`delete` events flowing from the facade through a bus to a
//! worker pool that drives the processing engine.

pub mod memory;
pub mod worker;

use serde::{Deserialize, Serialize};

use crate::model::Object;

/// Mirrors the original program's small closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Refresh,
    Update,
    Processed,
    Delete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Refresh => "refresh",
            EventType::Update => "update",
            EventType::Processed => "processed",
            EventType::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub object_id: String,
}

impl Event {
    pub fn new(event_type: EventType, object_id: impl Into<String>) -> Self {
        Self {
            event_type,
            error: String::new(),
            object_id: object_id.into(),
        }
    }

    pub fn failed(event_type: EventType, object_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            event_type,
            error: error.into(),
            object_id: object_id.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    pub fn for_object(event_type: EventType, object: &Object) -> Self {
        Self::new(event_type, object.id())
    }
}

/// The message bus contract. The in-process `memory` transport is the one
/// fully implemented here; `nats://`/`kafka://` URLs resolve to this
/// trait boundary only, per §4.G.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event);
    /// Receive the next event, or `None` once the bus is closed.
    async fn recv(&self) -> Option<Event>;
}

pub fn open_event_bus(url: &str) -> Result<std::sync::Arc<dyn EventBus>, crate::errors::StoreError> {
    if url == "memory" || url.is_empty() {
        return Ok(std::sync::Arc::new(memory::MemoryEventBus::new()));
    }
    if url.starts_with("nats://") || url.starts_with("kafka://") {
        return Err(crate::errors::StoreError::Config(format!(
            "event bus transport `{url}` is a trait-boundary contract only in this build"
        )));
    }
    Err(crate::errors::StoreError::Config(format!("unrecognized events url: {url}")))
}
