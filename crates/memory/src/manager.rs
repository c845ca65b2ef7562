//! Tiered memory manager.
//!
//! Short-term holds recent conversational messages verbatim, working memory
//! holds file contents keyed by path with decaying relevance, and long-term
//! holds decisions, insights and compression summaries. Every operation takes
//! the internal lock once, so each is atomic on its own; sequences of
//! operations are only consistent under the agent's turn lock.

use std::collections::VecDeque;
use std::sync::Arc;

use codeclaw_core::error::MemoryError;
use codeclaw_core::memory::{LongTermStore, MemoryItem, MemoryStats, MemoryTier};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Long-term items rendered into the prompt history digest.
const DIGEST_ITEMS: usize = 30;
const DIGEST_ITEM_CHARS: usize = 600;

/// Tier caps and compression thresholds.
#[derive(Debug, Clone)]
pub struct MemorySettings {
    pub short_term_cap: usize,
    pub working_cap: usize,
    pub long_term_cap: usize,
    /// Short-term length at which the oldest items are offered for compression
    pub compression_trigger: usize,
    /// Short-term items left verbatim by a compression
    pub keep_recent: usize,
    /// Working-memory relevance below which items are evicted first
    pub low_water: f32,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            short_term_cap: 60,
            working_cap: 24,
            long_term_cap: 200,
            compression_trigger: 40,
            keep_recent: 16,
            low_water: 0.1,
        }
    }
}

#[derive(Default)]
struct Tiers {
    short: VecDeque<MemoryItem>,
    working: Vec<MemoryItem>,
    long: Vec<MemoryItem>,
    compressions: u64,
}

/// Three-tier memory with pluggable long-term persistence.
pub struct MemoryManager {
    settings: MemorySettings,
    tiers: RwLock<Tiers>,
    store: Arc<dyn LongTermStore>,
}

impl MemoryManager {
    pub fn new(settings: MemorySettings, store: Arc<dyn LongTermStore>) -> Self {
        Self {
            settings,
            tiers: RwLock::new(Tiers::default()),
            store,
        }
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    /// Append a conversational message to short-term memory, dropping the
    /// oldest items past the cap.
    pub async fn add_message(&self, role: &str, content: &str) -> String {
        let item = MemoryItem::new(MemoryTier::Short, role, content);
        let id = item.id.clone();
        let mut tiers = self.tiers.write().await;
        tiers.short.push_back(item);
        while tiers.short.len() > self.settings.short_term_cap {
            tiers.short.pop_front();
        }
        id
    }

    /// Insert or refresh the working-memory entry for `path`.
    pub async fn add_file(&self, path: &str, content: &str, relevance: f32) {
        let mut tiers = self.tiers.write().await;
        if let Some(existing) = tiers.working.iter_mut().find(|i| i.path.as_deref() == Some(path)) {
            existing.content = content.to_string();
            existing.relevance = relevance.clamp(0.0, 1.0);
            existing.touch();
            return;
        }

        let mut item = MemoryItem::new(MemoryTier::Working, "file", content).with_relevance(relevance);
        item.path = Some(path.to_string());
        tiers.working.push(item);
        self.evict_working(&mut tiers);
    }

    /// Decay every working-memory relevance by `(1 - delta)`.
    pub async fn age_working_memory(&self, delta: f32) {
        let factor = (1.0 - delta).clamp(0.0, 1.0);
        let mut tiers = self.tiers.write().await;
        for item in &mut tiers.working {
            item.relevance *= factor;
        }
        self.evict_working(&mut tiers);
    }

    fn evict_working(&self, tiers: &mut Tiers) {
        let low_water = self.settings.low_water;
        while tiers.working.len() > self.settings.working_cap {
            // Stale entries go first, least recently used among them.
            let stale = tiers
                .working
                .iter()
                .enumerate()
                .filter(|(_, i)| i.relevance < low_water)
                .min_by_key(|(_, i)| i.accessed_at)
                .map(|(pos, _)| pos);
            let victim = stale.or_else(|| {
                tiers
                    .working
                    .iter()
                    .enumerate()
                    .min_by(|(_, a), (_, b)| {
                        a.relevance
                            .total_cmp(&b.relevance)
                            .then(a.accessed_at.cmp(&b.accessed_at))
                    })
                    .map(|(pos, _)| pos)
            });
            let Some(pos) = victim else { break };
            let evicted = tiers.working.remove(pos);
            debug!(path = ?evicted.path, relevance = evicted.relevance, "Evicted working memory item");
        }
    }

    /// Record a durable decision or insight in long-term memory.
    pub async fn add_decision(&self, text: &str, tags: Vec<String>) {
        let item = MemoryItem::new(MemoryTier::Long, "decision", text).with_tags(tags);
        let mut tiers = self.tiers.write().await;
        tiers.long.push(item);
        self.evict_long(&mut tiers);
    }

    fn evict_long(&self, tiers: &mut Tiers) {
        let excess = tiers.long.len().saturating_sub(self.settings.long_term_cap);
        if excess > 0 {
            tiers.long.drain(..excess);
            debug!(evicted = excess, "Evicted oldest long-term items");
        }
    }

    /// Short-term memory, oldest first.
    pub async fn messages(&self) -> Vec<MemoryItem> {
        self.tiers.read().await.short.iter().cloned().collect()
    }

    pub async fn short_term_len(&self) -> usize {
        self.tiers.read().await.short.len()
    }

    /// Working memory, most relevant first.
    pub async fn working_items(&self) -> Vec<MemoryItem> {
        let mut items = self.tiers.read().await.working.clone();
        items.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        items
    }

    pub async fn working_item(&self, path: &str) -> Option<MemoryItem> {
        self.tiers
            .read()
            .await
            .working
            .iter()
            .find(|i| i.path.as_deref() == Some(path))
            .cloned()
    }

    pub async fn long_term_items(&self) -> Vec<MemoryItem> {
        self.tiers.read().await.long.clone()
    }

    /// Textual digest of long-term memory for the prompt's history section.
    /// Empty when there is nothing to report.
    pub async fn context_digest(&self) -> String {
        let tiers = self.tiers.read().await;
        if tiers.long.is_empty() {
            return String::new();
        }

        let skip = tiers.long.len().saturating_sub(DIGEST_ITEMS);
        let mut digest = String::new();
        for item in tiers.long.iter().skip(skip) {
            let content: String = item.content.chars().take(DIGEST_ITEM_CHARS).collect();
            digest.push_str(&format!("- [{}] {}", item.role, content.trim()));
            if !item.tags.is_empty() {
                digest.push_str(&format!(" ({})", item.tags.join(", ")));
            }
            digest.push('\n');
        }
        digest
    }

    /// The oldest short-term items once short-term reaches the compression
    /// trigger; everything but the `keep_recent` newest. Empty otherwise.
    pub async fn items_to_compress(&self) -> Vec<MemoryItem> {
        let tiers = self.tiers.read().await;
        let len = tiers.short.len();
        if len < self.settings.compression_trigger {
            return Vec::new();
        }
        let take = len.saturating_sub(self.settings.keep_recent);
        tiers.short.iter().take(take).cloned().collect()
    }

    /// Remove the short-term items named by `ids` and insert `summary` into
    /// long-term memory, as one step. Returns how many items were folded.
    pub async fn compress_items(&self, ids: &[String], summary: &str) -> usize {
        let mut tiers = self.tiers.write().await;
        let before = tiers.short.len();
        tiers.short.retain(|item| !ids.contains(&item.id));
        let folded = before - tiers.short.len();
        if folded == 0 {
            return 0;
        }

        let item = MemoryItem::new(MemoryTier::Long, "summary", summary).with_tags(vec!["compressed".into()]);
        tiers.long.push(item);
        tiers.compressions += 1;
        self.evict_long(&mut tiers);
        debug!(folded, summary_chars = summary.len(), "Compressed short-term memory");
        folded
    }

    pub async fn stats(&self) -> MemoryStats {
        let tiers = self.tiers.read().await;
        MemoryStats {
            short_term: tiers.short.len(),
            working: tiers.working.len(),
            long_term: tiers.long.len(),
            compressions: tiers.compressions,
        }
    }

    /// Persist the long-term tier. Failures are logged and returned; callers
    /// treat them as non-fatal.
    pub async fn save(&self) -> Result<(), MemoryError> {
        let items = self.tiers.read().await.long.clone();
        self.store.save(&items).await.inspect_err(|e| {
            warn!(store = self.store.name(), error = %e, "Failed to save long-term memory");
        })
    }

    /// Replace the long-term tier with the persisted snapshot, keeping the
    /// newest items when it exceeds the cap.
    pub async fn load(&self) -> Result<usize, MemoryError> {
        let items = self.store.load().await.inspect_err(|e| {
            warn!(store = self.store.name(), error = %e, "Failed to load long-term memory");
        })?;
        let mut tiers = self.tiers.write().await;
        tiers.long = items;
        self.evict_long(&mut tiers);
        Ok(tiers.long.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use async_trait::async_trait;

    fn manager(settings: MemorySettings) -> MemoryManager {
        MemoryManager::new(settings, Arc::new(InMemoryStore::new()))
    }

    fn small() -> MemorySettings {
        MemorySettings {
            short_term_cap: 5,
            working_cap: 2,
            long_term_cap: 3,
            compression_trigger: 4,
            keep_recent: 1,
            low_water: 0.1,
        }
    }

    #[tokio::test]
    async fn short_term_keeps_order_and_cap() {
        let mem = manager(small());
        for i in 0..7 {
            mem.add_message("user", &format!("m{i}")).await;
        }
        let messages = mem.messages().await;
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content, "m2");
        assert_eq!(messages[4].content, "m6");
    }

    #[tokio::test]
    async fn add_file_upserts_by_path() {
        let mem = manager(small());
        mem.add_file("a.rs", "v1", 1.0).await;
        mem.age_working_memory(0.5).await;
        mem.add_file("a.rs", "v2", 1.0).await;

        let item = mem.working_item("a.rs").await.unwrap();
        assert_eq!(item.content, "v2");
        assert!((item.relevance - 1.0).abs() < f32::EPSILON);
        assert_eq!(mem.stats().await.working, 1);
    }

    #[tokio::test]
    async fn aging_decays_multiplicatively() {
        let mem = manager(small());
        mem.add_file("a.rs", "x", 0.8).await;
        mem.age_working_memory(0.25).await;
        let item = mem.working_item("a.rs").await.unwrap();
        assert!((item.relevance - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn working_cap_evicts_stale_before_relevant() {
        let mem = manager(small());
        mem.add_file("stale.rs", "x", 0.05).await;
        mem.add_file("hot.rs", "x", 0.9).await;
        mem.add_file("new.rs", "x", 0.5).await;

        assert_eq!(mem.stats().await.working, 2);
        assert!(mem.working_item("stale.rs").await.is_none());
        assert!(mem.working_item("hot.rs").await.is_some());
    }

    #[tokio::test]
    async fn working_cap_evicts_lowest_relevance() {
        let mem = manager(small());
        mem.add_file("a.rs", "x", 0.9).await;
        mem.add_file("b.rs", "x", 0.3).await;
        mem.add_file("c.rs", "x", 0.6).await;

        assert!(mem.working_item("b.rs").await.is_none());
        let paths: Vec<_> = mem.working_items().await.into_iter().filter_map(|i| i.path).collect();
        assert_eq!(paths, vec!["a.rs", "c.rs"]);
    }

    #[tokio::test]
    async fn long_term_cap_drops_oldest() {
        let mem = manager(small());
        for i in 0..5 {
            mem.add_decision(&format!("d{i}"), vec![]).await;
        }
        let long = mem.long_term_items().await;
        assert_eq!(long.len(), 3);
        assert_eq!(long[0].content, "d2");
    }

    #[tokio::test]
    async fn compression_folds_oldest_items() {
        let mem = manager(small());
        for i in 0..3 {
            mem.add_message("user", &format!("m{i}")).await;
        }
        assert!(mem.items_to_compress().await.is_empty());

        mem.add_message("assistant", "m3").await;
        let items = mem.items_to_compress().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].content, "m0");

        let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(mem.compress_items(&ids, "talked about m0..m2").await, 3);

        let stats = mem.stats().await;
        assert_eq!(stats.short_term, 1);
        assert_eq!(stats.long_term, 1);
        assert_eq!(stats.compressions, 1);
        assert!(mem.context_digest().await.contains("[summary] talked about m0..m2"));
    }

    #[tokio::test]
    async fn compress_with_unknown_ids_is_a_no_op() {
        let mem = manager(small());
        mem.add_message("user", "hi").await;
        assert_eq!(mem.compress_items(&["nope".into()], "s").await, 0);
        assert_eq!(mem.stats().await.long_term, 0);
    }

    #[tokio::test]
    async fn digest_lists_tags() {
        let mem = manager(MemorySettings::default());
        assert!(mem.context_digest().await.is_empty());
        mem.add_decision("Prefer thiserror", vec!["decision".into()]).await;
        assert_eq!(mem.context_digest().await, "- [decision] Prefer thiserror (decision)\n");
    }

    #[tokio::test]
    async fn save_and_load_round_trip_long_term_only() {
        let store = Arc::new(InMemoryStore::new());
        let mem = MemoryManager::new(small(), store.clone());
        mem.add_message("user", "volatile").await;
        mem.add_file("a.rs", "volatile", 1.0).await;
        mem.add_decision("durable", vec![]).await;
        mem.save().await.unwrap();

        let fresh = MemoryManager::new(small(), store);
        assert_eq!(fresh.load().await.unwrap(), 1);
        let stats = fresh.stats().await;
        assert_eq!((stats.short_term, stats.working, stats.long_term), (0, 0, 1));
    }

    struct BrokenStore;

    #[async_trait]
    impl LongTermStore for BrokenStore {
        fn name(&self) -> &str {
            "broken"
        }
        async fn save(&self, _items: &[MemoryItem]) -> Result<(), MemoryError> {
            Err(MemoryError::Storage("disk full".into()))
        }
        async fn load(&self) -> Result<Vec<MemoryItem>, MemoryError> {
            Err(MemoryError::Storage("unreadable".into()))
        }
    }

    #[tokio::test]
    async fn persistence_failures_leave_memory_intact() {
        let mem = MemoryManager::new(small(), Arc::new(BrokenStore));
        mem.add_decision("kept", vec![]).await;
        assert!(mem.save().await.is_err());
        assert!(mem.load().await.is_err());
        assert_eq!(mem.stats().await.long_term, 1);
    }
}
