//! Domain event system: decoupled communication between bounded contexts.
//!
//! Stores publish events when sessions come and go or instructions are
//! learned. Anything interested (metrics, audit, the CLI) subscribes
//! without the stores knowing about it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    SessionCreated {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Removed because its TTL elapsed (sweep or lazy check)
    SessionExpired {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Removed to make room under the session cap
    SessionEvicted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    SessionDeleted {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An upsert created or merged a record
    InstructionLearned {
        record_id: String,
        category: String,
        merged: bool,
        usage_count: u64,
        timestamp: DateTime<Utc>,
    },

    /// The background extraction path gave up
    ExtractionFailed {
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::SessionExpired {
            session_id: "s1".into(),
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::SessionExpired { session_id, .. } => assert_eq!(session_id, "s1"),
            _ => panic!("Expected SessionExpired event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ExtractionFailed {
            session_id: "s1".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
