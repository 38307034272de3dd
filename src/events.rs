//! In-process pub/sub for status and sync events
//!
//! Runtime fan-out only; events are not persisted. Emission never blocks the
//! emitter: a subscriber that falls more than the channel capacity behind
//! loses the oldest events and sees a lag notice on its receiver.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::document::DocumentStatus;

const CHANNEL_CAPACITY: usize = 256;

/// Event payloads, tagged with their wire type name
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    #[serde(rename = "document.created")]
    DocumentCreated { document_id: Uuid, filename: String },
    #[serde(rename = "document.status_changed")]
    DocumentStatusChanged {
        document_id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
        reason: String,
    },
    #[serde(rename = "sync.start")]
    SyncStart { binding_id: Uuid },
    #[serde(rename = "sync.progress")]
    SyncProgress {
        binding_id: Uuid,
        processed: usize,
    },
    #[serde(rename = "sync.complete")]
    SyncComplete {
        binding_id: Uuid,
        added: usize,
        updated: usize,
        removed: usize,
    },
    #[serde(rename = "sync.error")]
    SyncError { binding_id: Uuid, error: String },
}

/// An emitted event
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast-based event bus
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Broadcast an event to all current subscribers. Best-effort: having no
    /// subscribers is not an error.
    pub fn emit(&self, kind: EventKind) {
        let event = Event {
            kind,
            timestamp: Utc::now(),
        };
        tracing::debug!(?event, "event emitted");
        let _ = self.tx.send(event);
    }

    /// Subscribe to the stream. Events emitted before this call are not seen.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_emission_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let id = Uuid::new_v4();
        bus.emit(EventKind::SyncStart { binding_id: id });
        bus.emit(EventKind::SyncComplete {
            binding_id: id,
            added: 1,
            updated: 0,
            removed: 0,
        });

        assert!(matches!(rx.recv().await.unwrap().kind, EventKind::SyncStart { .. }));
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            EventKind::SyncComplete { added: 1, .. }
        ));
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_not_an_error() {
        let bus = EventBus::new();
        bus.emit(EventKind::DocumentCreated {
            document_id: Uuid::new_v4(),
            filename: "a.md".into(),
        });
    }

    #[test]
    fn wire_shape_has_type_payload_timestamp() {
        let event = Event {
            kind: EventKind::SyncError {
                binding_id: Uuid::nil(),
                error: "boom".into(),
            },
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "sync.error");
        assert_eq!(v["payload"]["error"], "boom");
        assert!(v["timestamp"].is_string());
    }
}
