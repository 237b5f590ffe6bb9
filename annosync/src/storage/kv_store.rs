//! Durable key-value storage
//!
//! A generic string store the queue is persisted through. The SQLite
//! implementation survives restarts; the memory one lives with the process.

use crate::database::Repository;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Key-value store backed by the SQLite `kv_store` table
#[derive(Clone)]
pub struct SqliteKeyValueStore {
    repo: Repository,
}

impl SqliteKeyValueStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.repo.get_value(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.repo.set_value(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.repo.remove_value(key).await
    }
}

/// Process-local key-value store
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
