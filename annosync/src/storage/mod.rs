//! Storage module
//!
//! Durable key-value storage and the pending-operation queue persisted on it.

pub mod kv_store;
pub mod queue_store;

pub use kv_store::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use queue_store::DurableQueueStore;
