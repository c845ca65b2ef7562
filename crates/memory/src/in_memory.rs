//! In-memory long-term store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use codeclaw_core::error::MemoryError;
use codeclaw_core::memory::{LongTermStore, MemoryItem};
use tokio::sync::RwLock;

/// Keeps the last saved snapshot in a Vec.
#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<Vec<MemoryItem>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, as if a previous session had saved `items`.
    pub fn with_items(items: Vec<MemoryItem>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }
}

#[async_trait]
impl LongTermStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save(&self, items: &[MemoryItem]) -> Result<(), MemoryError> {
        *self.items.write().await = items.to_vec();
        Ok(())
    }

    async fn load(&self) -> Result<Vec<MemoryItem>, MemoryError> {
        Ok(self.items.read().await.clone())
    }
}
