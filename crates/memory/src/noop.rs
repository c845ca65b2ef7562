//! No-op store: disables long-term persistence entirely.

use async_trait::async_trait;
use codeclaw_core::error::MemoryError;
use codeclaw_core::memory::{LongTermStore, MemoryItem};

pub struct NoopStore;

#[async_trait]
impl LongTermStore for NoopStore {
    fn name(&self) -> &str {
        "none"
    }

    async fn save(&self, _items: &[MemoryItem]) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<MemoryItem>, MemoryError> {
        Ok(Vec::new())
    }
}
