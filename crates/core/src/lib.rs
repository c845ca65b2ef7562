//! # codeclaw core
//!
//! Domain types, traits, and error definitions for the codeclaw coding-assistant
//! shell. This crate has no framework dependencies beyond tokio primitives; it
//! defines the domain model that all other crates implement against.
//!
//! Every seam is a trait here (`Provider`, `Tool`, `LongTermStore`,
//! `ProjectContext`). Implementations live in their respective crates.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod project;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use memory::{LongTermStore, MemoryItem, MemoryStats, MemoryTier};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use project::{ProjectContext, ProjectSummary, ScannedProject};
pub use provider::{
    FinishReason, Provider, ProviderRequest, ProviderResponse, RateLimits, StreamChunk, Usage,
};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use tokio_util::sync::CancellationToken;
