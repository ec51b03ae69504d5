//! Domain event system: decoupled communication between bounded contexts.
//!
//! The router publishes an event for each routing decision, tool execution
//! and memory write. Subscribers (the CLI's verbose mode, tests) observe them
//! without being wired into the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A routing tier claimed the turn
    TierSelected {
        session_id: String,
        tier: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A memory manager persisted something
    MemoryWritten {
        collection: String,
        key: String,
        timestamp: DateTime<Utc>,
    },

    /// A discovery attempt was logged
    DiscoveryLogged {
        service: String,
        operation: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// An error was caught at a tier boundary
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn memory_written(collection: impl Into<String>, key: impl Into<String>) -> Self {
        DomainEvent::MemoryWritten {
            collection: collection.into(),
            key: key.into(),
            timestamp: Utc::now(),
        }
    }
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
