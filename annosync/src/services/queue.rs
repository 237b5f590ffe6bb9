//! Pending-operation queue
//!
//! In-memory mirror of the durable queue plus the drain pass that replays
//! it against the gateway. Every mutation goes through the queue mutex, so
//! concurrent enqueues never lose each other; drains are single-flight.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use crate::database::{AnnotationPatch, AnnotationRecord, PendingAction, PendingOperation};
use crate::error::{AppError, Result, RetryClass};
use crate::gateway::AnnotationGateway;
use crate::identity::IdentityProvider;
use crate::storage::DurableQueueStore;

/// Result of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Entries present when the pass started
    pub attempted: usize,
    pub synced: usize,
    /// Malformed entries that were dropped without a remote call
    pub discarded: usize,
    /// Entries the remote service refused permanently; dropped
    pub rejected: usize,
    /// Entries still queued for the next pass
    pub remaining: usize,
}

impl DrainSummary {
    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }
}

enum Replay {
    Synced,
    /// Retry on a later pass
    Held(AppError),
    /// Malformed entry that can never be sent
    Discarded(String),
    /// Refused by the remote service for good
    Rejected(AppError),
}

#[derive(Default)]
struct QueueState {
    ops: Vec<PendingOperation>,
    loaded: bool,
}

pub struct PendingQueue {
    store: DurableQueueStore,
    state: Mutex<QueueState>,
    drain_lock: Mutex<()>,
    has_pending: AtomicBool,
    syncing: AtomicBool,
}

impl PendingQueue {
    pub fn new(store: DurableQueueStore) -> Self {
        Self {
            store,
            state: Mutex::new(QueueState::default()),
            drain_lock: Mutex::new(()),
            has_pending: AtomicBool::new(false),
            syncing: AtomicBool::new(false),
        }
    }

    pub fn has_pending(&self) -> bool {
        self.has_pending.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Lock the queue, loading the persisted copy on first access so an
    /// early enqueue never overwrites what a previous session left behind.
    async fn lock(&self) -> MutexGuard<'_, QueueState> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            self.load_into(&mut state).await;
        }
        state
    }

    /// Read the durable queue in front of anything enqueued meanwhile.
    ///
    /// A storage error leaves the queue unloaded so the next access retries;
    /// until then nothing is written back.
    async fn load_into(&self, state: &mut QueueState) {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(AppError::Serialization(e)) => {
                tracing::error!("Pending annotations are unreadable, starting empty: {}", e);
                if let Err(e) = self.store.preserve_unreadable().await {
                    tracing::error!("Failed to preserve unreadable pending annotations: {}", e);
                    return;
                }
                Vec::new()
            }
            Err(e) => {
                tracing::error!("Failed to load pending annotations, will retry: {}", e);
                return;
            }
        };

        tracing::info!("Restored {} pending annotation operations", stored.len());

        let unsaved = std::mem::take(&mut state.ops);
        state.ops = stored;
        state.loaded = true;

        if !unsaved.is_empty() {
            state.ops.extend(unsaved);
            self.persist(&state.ops).await;
        }
        self.has_pending.store(!state.ops.is_empty(), Ordering::SeqCst);
    }

    /// Load the persisted queue if that has not happened yet
    pub async fn restore(&self) {
        drop(self.lock().await);
    }

    pub async fn snapshot(&self) -> Vec<PendingOperation> {
        self.lock().await.ops.clone()
    }

    pub async fn len(&self) -> usize {
        self.lock().await.ops.len()
    }

    /// Ids with at least one queued operation
    pub async fn pending_ids(&self) -> HashSet<String> {
        self.lock().await.ops.iter().map(|op| op.id.clone()).collect()
    }

    /// Append an operation, persisting the full queue first
    pub async fn enqueue(&self, op: PendingOperation) {
        let mut state = self.lock().await;

        tracing::debug!(
            "Queueing {:?} for annotation {} (queue length {})",
            op.action,
            op.id,
            state.ops.len() + 1
        );

        let mut next = state.ops.clone();
        next.push(op);
        if state.loaded {
            self.persist(&next).await;
        } else {
            tracing::warn!("Durable queue not loaded yet, keeping operation in memory");
        }

        state.ops = next;
        self.has_pending.store(true, Ordering::SeqCst);
    }

    async fn persist(&self, ops: &[PendingOperation]) {
        // The mirror is still updated by callers; durable state may lag
        if let Err(e) = self.store.save(ops).await {
            tracing::error!("Failed to persist pending annotations: {}", e);
        }
    }

    /// Replay queued operations in FIFO order and prune the ones that
    /// reached the remote store.
    ///
    /// Once an entry for an annotation is held back, later entries for the
    /// same annotation are held too so they never overtake it.
    pub async fn drain(
        &self,
        gateway: &dyn AnnotationGateway,
        identity: &dyn IdentityProvider,
    ) -> DrainSummary {
        let _drain = self.drain_lock.lock().await;

        let snapshot = {
            let state = self.lock().await;
            if !state.loaded {
                tracing::warn!("Durable queue not loaded yet, skipping sync pass");
                return DrainSummary::default();
            }
            state.ops.clone()
        };
        if snapshot.is_empty() {
            return DrainSummary::default();
        }

        self.syncing.store(true, Ordering::SeqCst);
        tracing::info!("Syncing {} pending annotation operations", snapshot.len());

        let mut settled = vec![false; snapshot.len()];
        let mut held: HashSet<&str> = HashSet::new();
        let mut synced = 0;
        let mut discarded = 0;
        let mut rejected = 0;

        for (idx, op) in snapshot.iter().enumerate() {
            if held.contains(op.id.as_str()) {
                tracing::debug!(
                    "Holding {:?} for {} behind an earlier failure",
                    op.action,
                    op.id
                );
                continue;
            }

            match Self::replay(op, gateway, identity).await {
                Replay::Synced => {
                    settled[idx] = true;
                    synced += 1;
                }
                Replay::Discarded(reason) => {
                    tracing::error!(
                        "Dropping unreplayable {:?} for {}: {}",
                        op.action,
                        op.id,
                        reason
                    );
                    settled[idx] = true;
                    discarded += 1;
                }
                Replay::Rejected(e) => {
                    tracing::error!(
                        "Remote service rejected {:?} for {}, dropping it: {}",
                        op.action,
                        op.id,
                        e
                    );
                    settled[idx] = true;
                    rejected += 1;
                }
                Replay::Held(e) => {
                    tracing::warn!("Failed to sync {:?} for {}: {}", op.action, op.id, e);
                    held.insert(op.id.as_str());
                }
            }
        }

        let attempted = snapshot.len();
        let remaining = attempted - synced - discarded - rejected;

        if remaining < attempted {
            let mut state = self.lock().await;

            // Only drains remove entries, so the current queue still starts
            // with the snapshot; anything after it arrived during the pass.
            let arrived: Vec<PendingOperation> =
                state.ops.iter().skip(attempted).cloned().collect();
            let mut next: Vec<PendingOperation> = snapshot
                .iter()
                .zip(&settled)
                .filter(|(_, done)| !**done)
                .map(|(op, _)| op.clone())
                .collect();
            next.extend(arrived);

            self.persist(&next).await;
            state.ops = next;
            self.has_pending.store(!state.ops.is_empty(), Ordering::SeqCst);
        }

        self.syncing.store(false, Ordering::SeqCst);

        tracing::info!(
            "Sync pass finished: {} synced, {} discarded, {} rejected, {} remaining",
            synced,
            discarded,
            rejected,
            remaining
        );

        DrainSummary {
            attempted,
            synced,
            discarded,
            rejected,
            remaining,
        }
    }

    async fn replay(
        op: &PendingOperation,
        gateway: &dyn AnnotationGateway,
        identity: &dyn IdentityProvider,
    ) -> Replay {
        match op.action {
            PendingAction::Add => {
                let Some(data) = &op.data else {
                    return Replay::Discarded("add without payload".to_string());
                };
                let Some(user_id) = identity.current_user_id().await else {
                    return Replay::Held(AppError::Unauthenticated);
                };

                let record = AnnotationRecord::from_draft(&op.id, user_id, data, op.queued_at());
                match gateway.insert(&record).await {
                    Ok(()) => Replay::Synced,
                    // An earlier attempt already created the row
                    Err(e) if e.status_code() == Some(409) => {
                        tracing::debug!("Annotation {} already exists remotely", op.id);
                        Replay::Synced
                    }
                    Err(e) => Self::settle(Err(e)),
                }
            }
            PendingAction::Update => {
                let Some(data) = &op.data else {
                    return Replay::Discarded("update without payload".to_string());
                };

                let patch = AnnotationPatch::from_draft(data, op.queued_at());
                Self::settle(gateway.update(&op.id, &patch).await)
            }
            PendingAction::Delete => Self::settle(gateway.delete(&op.id).await),
        }
    }

    fn settle(result: Result<()>) -> Replay {
        match result {
            Ok(()) => Replay::Synced,
            Err(e) => match e.retry_class() {
                RetryClass::Permanent => Replay::Rejected(e),
                RetryClass::Retryable | RetryClass::ReauthRequired => Replay::Held(e),
            },
        }
    }
}
