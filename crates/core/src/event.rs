//! Domain event system: decoupled communication between bounded contexts.
//!
//! The agent publishes events as turns progress. Status readouts, the audit
//! trail and tests subscribe without coupling to the agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn began (user or heartbeat initiated)
    TurnStarted {
        conversation_id: String,
        input_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn finished with a final answer
    TurnCompleted {
        conversation_id: String,
        model: String,
        tool_rounds: u32,
        continuations: u32,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A turn was stopped by the operator or by shutdown
    TurnCancelled {
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A turn ended in an error
    TurnFailed {
        conversation_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        call_id: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A sensitive tool call was approved or denied
    ApprovalDecided {
        tool_name: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },

    /// Short-term memory was folded into a long-term summary
    ContextCompressed {
        items: usize,
        summary_chars: usize,
        timestamp: DateTime<Utc>,
    },

    /// The heartbeat woke the agent
    HeartbeatFired {
        tick: u64,
        reflection: bool,
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
        // No subscribers is fine.
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
