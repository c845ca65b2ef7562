//! File-based long-term store: one JSON-encoded [`MemoryItem`] per line.
//!
//! Default location: `~/.codeclaw/memory/long_term.jsonl`. Saves replace the
//! whole file through a temporary sibling and a rename, so a crash mid-write
//! leaves the previous snapshot intact.

use async_trait::async_trait;
use codeclaw_core::error::MemoryError;
use codeclaw_core::memory::{LongTermStore, MemoryItem};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A JSONL file holding the long-term tier.
pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(content: &str) -> Vec<MemoryItem> {
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MemoryItem>(line) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory item");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl LongTermStore for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn save(&self, items: &[MemoryItem]) -> Result<(), MemoryError> {
        let mut content = String::new();
        for item in items {
            let line = serde_json::to_string(item)
                .map_err(|e| MemoryError::Serialization(format!("memory item {}: {e}", item.id)))?;
            content.push_str(&line);
            content.push('\n');
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MemoryError::Storage(format!("Failed to create memory directory: {e}")))?;
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to replace memory file: {e}")))?;

        debug!(path = %self.path.display(), count = items.len(), "Long-term memory saved");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<MemoryItem>, MemoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::Storage(format!("Failed to read memory file: {e}"))),
        };
        let items = Self::parse(&content);
        debug!(path = %self.path.display(), count = items.len(), "Long-term memory loaded");
        Ok(items)
    }
}
