//! Domain event system: decoupled observation of the orchestration core.
//!
//! The controller publishes events as turns progress. Subscribers (audit
//! sinks, status displays) react without the core knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::ErrorCode;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool call went through the dispatcher
    ToolDispatched {
        session_id: String,
        request_id: String,
        tool_name: String,
        outcome: String,
        code: Option<ErrorCode>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The context window evicted history to fit the budget
    ContextCompacted {
        session_id: String,
        evicted: usize,
        tokens_before: usize,
        tokens_after: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn finished and was committed
    TurnCompleted {
        session_id: String,
        messages_added: usize,
        token_count: usize,
        iterations: usize,
        timestamp: DateTime<Utc>,
    },

    /// A turn ended with a structured failure
    TurnFailed {
        session_id: String,
        code: ErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

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

        bus.publish(DomainEvent::ToolDispatched {
            session_id: "s1".into(),
            request_id: "c1".into(),
            tool_name: "bash_exec".into(),
            outcome: "success".into(),
            code: None,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolDispatched {
                tool_name, outcome, ..
            } => {
                assert_eq!(tool_name, "bash_exec");
                assert_eq!(outcome, "success");
            }
            _ => panic!("Expected ToolDispatched event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::TurnFailed {
            session_id: "s1".into(),
            code: ErrorCode::TransportFailure,
            message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
