//! Tiered memory for codeclaw: the [`MemoryManager`] and the stores that
//! persist its long-term tier.

pub mod in_memory;
pub mod jsonl_store;
pub mod manager;
pub mod noop;

pub use in_memory::InMemoryStore;
pub use jsonl_store::JsonlStore;
pub use manager::{MemoryManager, MemorySettings};
pub use noop::NoopStore;
