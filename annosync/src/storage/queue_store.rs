//! Durable pending-operation queue
//!
//! The whole queue is stored as one JSON array under a fixed key.
//! This type owns no state; callers decide what the queue contains.

use crate::config::{PENDING_ANNOTATIONS_KEY, UNREADABLE_QUEUE_KEY};
use crate::database::PendingOperation;
use crate::error::Result;
use crate::storage::KeyValueStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct DurableQueueStore {
    store: Arc<dyn KeyValueStore>,
}

impl DurableQueueStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read the persisted queue; an absent value is an empty queue
    pub async fn load(&self) -> Result<Vec<PendingOperation>> {
        match self.store.get(PENDING_ANNOTATIONS_KEY).await? {
            Some(raw) if !raw.trim().is_empty() => {
                let ops: Vec<PendingOperation> = serde_json::from_str(&raw)?;
                tracing::debug!("Loaded {} pending operations", ops.len());
                Ok(ops)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Replace the persisted queue
    pub async fn save(&self, ops: &[PendingOperation]) -> Result<()> {
        let raw = serde_json::to_string(ops)?;
        self.store.set(PENDING_ANNOTATIONS_KEY, &raw).await?;
        tracing::debug!("Persisted {} pending operations", ops.len());
        Ok(())
    }

    /// Copy the stored value aside before it gets overwritten.
    ///
    /// Used when the value cannot be parsed, so nothing a previous
    /// session wrote is silently lost.
    pub async fn preserve_unreadable(&self) -> Result<()> {
        if let Some(raw) = self.store.get(PENDING_ANNOTATIONS_KEY).await? {
            self.store.set(UNREADABLE_QUEUE_KEY, &raw).await?;
            tracing::warn!(
                "Saved unreadable pending queue ({} bytes) under {}",
                raw.len(),
                UNREADABLE_QUEUE_KEY
            );
        }
        Ok(())
    }
}
