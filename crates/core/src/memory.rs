//! Memory domain types: tiered items and long-term persistence.
//!
//! The agent keeps three tiers of memory:
//! - Short-term: the latest conversational turns, verbatim
//! - Working: file-derived items keyed by path, with decaying relevance
//! - Long-term: durable decisions, insights and compressed summaries
//!
//! Only the long-term tier is persisted, through a [`LongTermStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MemoryError;

/// Which tier an item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Short,
    Working,
    Long,
}

/// A single memory item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Opaque identity
    pub id: String,

    pub content: String,

    /// Role tag ("user", "assistant", "file", "decision", "summary", ...)
    pub role: String,

    pub created_at: DateTime<Utc>,

    pub accessed_at: DateTime<Utc>,

    pub tier: MemoryTier,

    /// Relevance in [0, 1]
    pub relevance: f32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Working-memory key for items that came from a read-file tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl MemoryItem {
    pub fn new(tier: MemoryTier, role: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            role: role.into(),
            created_at: now,
            accessed_at: now,
            tier,
            relevance: 1.0,
            tags: Vec::new(),
            path: None,
        }
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = relevance.clamp(0.0, 1.0);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn touch(&mut self) {
        self.accessed_at = Utc::now();
    }
}

/// Tier sizes reported to status readouts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub short_term: usize,
    pub working: usize,
    pub long_term: usize,
    pub compressions: u64,
}

/// Persistence for the long-term tier.
///
/// Implementations: JSONL file, in-memory (for testing), none (no-op).
#[async_trait]
pub trait LongTermStore: Send + Sync {
    /// The backend name (e.g., "jsonl", "in_memory", "none").
    fn name(&self) -> &str;

    /// Replace the persisted long-term tier with `items`.
    async fn save(&self, items: &[MemoryItem]) -> std::result::Result<(), MemoryError>;

    /// Load the persisted long-term tier, oldest first.
    async fn load(&self) -> std::result::Result<Vec<MemoryItem>, MemoryError>;
}
