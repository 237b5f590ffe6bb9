//! Annotations service
//!
//! Single point of truth for annotation reads and writes. Every call is
//! routed either to the remote gateway or to the pending queue depending on
//! connectivity; remote failures are absorbed by queueing, never surfaced.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::queue::{DrainSummary, PendingQueue};
use crate::database::{
    Annotation, AnnotationPatch, AnnotationRecord, Category, HighlightColor, PendingOperation,
};
use crate::error::AppError;
use crate::gateway::AnnotationGateway;
use crate::identity::IdentityProvider;
use crate::storage::DurableQueueStore;

/// Why a read could not be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// No signed-in user, or the service refused the credentials
    Unauthenticated,
    /// The request never got a response
    Transport,
    /// The service answered with an error status
    Rejected,
    /// The response body could not be read as annotations
    Decode,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct FetchError {
    pub kind: FetchFailure,
    pub message: String,
}

impl From<&AppError> for FetchError {
    fn from(error: &AppError) -> Self {
        let kind = match error {
            AppError::Unauthenticated => FetchFailure::Unauthenticated,
            AppError::Gateway { status, .. } if matches!(*status, 401 | 403) => {
                FetchFailure::Unauthenticated
            }
            AppError::Gateway { .. } => FetchFailure::Rejected,
            AppError::Serialization(_) => FetchFailure::Decode,
            AppError::Http(e) if e.is_decode() => FetchFailure::Decode,
            _ => FetchFailure::Transport,
        };

        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Outcome of a read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Fresh from the remote service
    Remote(Vec<Annotation>),
    /// Served from the local cache while offline
    Cached(Vec<Annotation>),
    Failed(FetchError),
}

impl Fetched {
    /// Annotations carried by the result; empty when the read failed
    pub fn annotations(&self) -> &[Annotation] {
        match self {
            Fetched::Remote(items) | Fetched::Cached(items) => items,
            Fetched::Failed(_) => &[],
        }
    }

    pub fn into_annotations(self) -> Vec<Annotation> {
        match self {
            Fetched::Remote(items) | Fetched::Cached(items) => items,
            Fetched::Failed(_) => Vec::new(),
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Fetched::Cached(_))
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Fetched::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome of an update or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Applied remotely
    Synced,
    /// Applied locally and queued for the next drain
    Queued,
    NotFound,
    /// Rejected before touching any state
    Invalid,
}

impl WriteOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, WriteOutcome::Synced | WriteOutcome::Queued)
    }
}

/// Outcome of a manual sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncReport {
    NothingToSync,
    /// Nothing was attempted because the device is offline
    Offline,
    Completed { synced: usize },
    Partial { synced: usize, remaining: usize },
}

impl SyncReport {
    pub fn is_success(self) -> bool {
        matches!(self, SyncReport::NothingToSync | SyncReport::Completed { .. })
    }
}

impl From<DrainSummary> for SyncReport {
    fn from(summary: DrainSummary) -> Self {
        if summary.attempted == 0 {
            SyncReport::NothingToSync
        } else if summary.is_complete() {
            SyncReport::Completed {
                synced: summary.synced,
            }
        } else {
            SyncReport::Partial {
                synced: summary.synced,
                remaining: summary.remaining,
            }
        }
    }
}

/// Offline-tolerant annotation store
#[derive(Clone)]
pub struct AnnotationStore {
    gateway: Arc<dyn AnnotationGateway>,
    identity: Arc<dyn IdentityProvider>,
    queue: Arc<PendingQueue>,
    cache: Arc<RwLock<Vec<Annotation>>>,
    pub(crate) online: Arc<AtomicBool>,
}

impl AnnotationStore {
    /// Create a store that assumes the device is online until told otherwise
    pub fn new(
        gateway: Arc<dyn AnnotationGateway>,
        identity: Arc<dyn IdentityProvider>,
        queue_store: DurableQueueStore,
    ) -> Self {
        Self {
            gateway,
            identity,
            queue: Arc::new(PendingQueue::new(queue_store)),
            cache: Arc::new(RwLock::new(Vec::new())),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn has_pending_sync(&self) -> bool {
        self.queue.has_pending()
    }

    pub fn is_syncing(&self) -> bool {
        self.queue.is_syncing()
    }

    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.snapshot().await
    }

    /// Snapshot of the local cache, most recently added first
    pub async fn annotations(&self) -> Vec<Annotation> {
        self.cache.read().await.clone()
    }

    /// Load the queue left behind by a previous session
    pub async fn restore_pending(&self) {
        self.queue.restore().await;
    }

    /// Record a connectivity state; coming back online drains the queue
    pub async fn set_online(&self, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);

        if online && !was_online && self.has_pending_sync() {
            tracing::info!("Back online, syncing pending annotations");
            self.sync_pending().await;
        }
    }

    /// Run one drain pass regardless of connectivity
    pub async fn sync_pending(&self) -> DrainSummary {
        self.queue
            .drain(self.gateway.as_ref(), self.identity.as_ref())
            .await
    }

    /// Manually replay the queue
    pub async fn force_sync(&self) -> SyncReport {
        if !self.is_online() {
            tracing::warn!("Cannot sync pending annotations while offline");
            return SyncReport::Offline;
        }
        if self.queue.len().await == 0 {
            return SyncReport::NothingToSync;
        }

        SyncReport::from(self.sync_pending().await)
    }

    /// Annotations of a book, newest first
    pub async fn get_book_annotations(&self, book_id: &str) -> Fetched {
        if !self.is_online() {
            let mut items = self.cached(|a| a.book_id == book_id).await;
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            return Fetched::Cached(items);
        }

        if self.identity.current_user_id().await.is_none() {
            tracing::warn!("Cannot fetch annotations for book {} without a user", book_id);
            return Fetched::Failed(FetchError::from(&AppError::Unauthenticated));
        }

        match self.gateway.select_by_book(book_id).await {
            Ok(rows) => {
                self.merge_into_cache(|a| a.book_id == book_id, &rows).await;
                Fetched::Remote(rows)
            }
            Err(e) => {
                tracing::error!("Failed to fetch annotations for book {}: {}", book_id, e);
                Fetched::Failed(FetchError::from(&e))
            }
        }
    }

    /// Annotations of a chapter, ascending by position
    pub async fn get_chapter_annotations(&self, chapter_id: &str) -> Fetched {
        if !self.is_online() {
            let mut items = self.cached(|a| a.chapter_id == chapter_id).await;
            items.sort_by_key(|a| a.position);
            return Fetched::Cached(items);
        }

        match self.gateway.select_by_chapter(chapter_id).await {
            Ok(rows) => {
                self.merge_into_cache(|a| a.chapter_id == chapter_id, &rows)
                    .await;
                Fetched::Remote(rows)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to fetch annotations for chapter {}: {}",
                    chapter_id,
                    e
                );
                Fetched::Failed(FetchError::from(&e))
            }
        }
    }

    /// Annotations of a book in one category, newest first.
    ///
    /// Remote results are returned as-is; the cache is left untouched.
    pub async fn get_annotations_by_category(&self, book_id: &str, category: Category) -> Fetched {
        if !self.is_online() {
            let mut items = self
                .cached(|a| a.book_id == book_id && a.category == Some(category))
                .await;
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            return Fetched::Cached(items);
        }

        if self.identity.current_user_id().await.is_none() {
            return Fetched::Failed(FetchError::from(&AppError::Unauthenticated));
        }

        match self.gateway.select_by_category(book_id, category).await {
            Ok(rows) => Fetched::Remote(rows),
            Err(e) => {
                tracing::error!(
                    "Failed to fetch {} annotations for book {}: {}",
                    category,
                    book_id,
                    e
                );
                Fetched::Failed(FetchError::from(&e))
            }
        }
    }

    /// Create an annotation.
    ///
    /// Returns `None` for blank content, or when online with no signed-in
    /// user; nothing is cached or queued in either case.
    pub async fn add_annotation(
        &self,
        book_id: &str,
        chapter_id: &str,
        content: &str,
        position: u32,
        color: Option<HighlightColor>,
        category: Option<Category>,
    ) -> Option<Annotation> {
        if content.trim().is_empty() {
            tracing::warn!("Rejecting annotation with empty content");
            return None;
        }

        let now = Utc::now();
        let annotation = Annotation {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            chapter_id: chapter_id.to_string(),
            content: content.to_string(),
            position,
            color: color.unwrap_or_default(),
            category,
            created_at: now,
            updated_at: now,
        };

        tracing::debug!("Adding annotation {} to chapter {}", annotation.id, chapter_id);

        let synced = if self.is_online() {
            let Some(user_id) = self.identity.current_user_id().await else {
                tracing::error!("Cannot add annotation without a signed-in user");
                return None;
            };
            self.try_insert(&annotation, user_id).await
        } else {
            false
        };

        if !synced {
            self.queue
                .enqueue(
                    PendingOperation::add(&annotation.id, annotation.draft()).with_timestamp(now),
                )
                .await;
        }

        self.cache.write().await.insert(0, annotation.clone());

        Some(annotation)
    }

    /// Change content, color and category of a cached annotation.
    ///
    /// A missing color keeps the current one; the category is always
    /// replaced, so `None` clears it.
    pub async fn update_annotation(
        &self,
        id: &str,
        content: &str,
        color: Option<HighlightColor>,
        category: Option<Category>,
    ) -> WriteOutcome {
        if content.trim().is_empty() {
            tracing::warn!("Rejecting update of {} with empty content", id);
            return WriteOutcome::Invalid;
        }

        let now = Utc::now();
        let updated = {
            let mut cache = self.cache.write().await;
            let Some(entry) = cache.iter_mut().find(|a| a.id == id) else {
                tracing::warn!("Annotation not found for update: {}", id);
                return WriteOutcome::NotFound;
            };

            entry.content = content.to_string();
            if let Some(color) = color {
                entry.color = color;
            }
            entry.category = category;
            entry.updated_at = now;
            entry.clone()
        };

        let draft = updated.draft();

        if self.is_online() && !self.queued_behind(id).await {
            match self
                .gateway
                .update(id, &AnnotationPatch::from_draft(&draft, now))
                .await
            {
                Ok(()) => {
                    tracing::debug!("Annotation updated: {}", id);
                    return WriteOutcome::Synced;
                }
                Err(e) => tracing::warn!("Update of {} failed, queueing: {}", id, e),
            }
        }

        self.queue
            .enqueue(PendingOperation::update(id, draft).with_timestamp(now))
            .await;
        WriteOutcome::Queued
    }

    /// Delete an annotation known locally or, when online, remotely
    pub async fn delete_annotation(&self, id: &str) -> WriteOutcome {
        let cached = self.cache.read().await.iter().any(|a| a.id == id);

        if !cached && !self.remote_exists(id).await {
            tracing::warn!("Annotation not found for delete: {}", id);
            return WriteOutcome::NotFound;
        }

        self.cache.write().await.retain(|a| a.id != id);

        if self.is_online() && !self.queued_behind(id).await {
            match self.gateway.delete(id).await {
                Ok(()) => {
                    tracing::info!("Annotation deleted: {}", id);
                    return WriteOutcome::Synced;
                }
                Err(e) => tracing::warn!("Delete of {} failed, queueing: {}", id, e),
            }
        }

        self.queue.enqueue(PendingOperation::delete(id)).await;
        WriteOutcome::Queued
    }

    async fn try_insert(&self, annotation: &Annotation, user_id: String) -> bool {
        match self
            .gateway
            .insert(&AnnotationRecord::new(annotation, user_id))
            .await
        {
            Ok(()) => {
                tracing::info!("Annotation synced: {}", annotation.id);
                true
            }
            Err(e) => {
                tracing::warn!("Insert of {} failed, queueing: {}", annotation.id, e);
                false
            }
        }
    }

    /// Whether `id` still has queued operations; later writes must wait
    /// behind them so the remote store sees them in order.
    async fn queued_behind(&self, id: &str) -> bool {
        let pending = self.queue.pending_ids().await.contains(id);
        if pending {
            tracing::debug!("Annotation {} has queued operations, queueing behind them", id);
        }
        pending
    }

    async fn remote_exists(&self, id: &str) -> bool {
        if !self.is_online() {
            return false;
        }

        match self.gateway.select_by_id(id).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                tracing::error!("Failed to look up annotation {}: {}", id, e);
                false
            }
        }
    }

    async fn cached<F>(&self, filter: F) -> Vec<Annotation>
    where
        F: Fn(&Annotation) -> bool,
    {
        self.cache
            .read()
            .await
            .iter()
            .filter(|a| filter(*a))
            .cloned()
            .collect()
    }

    /// Replace the cached entries in `scope` with a fresh remote set.
    ///
    /// Entries with queued operations are left alone: a locally added or
    /// edited entry survives, and a row with any pending operation is not
    /// brought back from the remote copy.
    async fn merge_into_cache<F>(&self, scope: F, fresh: &[Annotation])
    where
        F: Fn(&Annotation) -> bool,
    {
        let pending = self.queue.pending_ids().await;
        let fresh_ids: HashSet<&str> = fresh.iter().map(|a| a.id.as_str()).collect();

        let mut cache = self.cache.write().await;
        cache.retain(|a| {
            pending.contains(&a.id) || (!scope(a) && !fresh_ids.contains(a.id.as_str()))
        });
        cache.extend(
            fresh
                .iter()
                .filter(|a| !pending.contains(&a.id))
                .cloned(),
        );

        tracing::debug!(
            "Merged {} remote annotations into cache ({} cached)",
            fresh.len(),
            cache.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::PendingAction;
    use crate::gateway::{GatewayCall, InMemoryGateway};
    use crate::identity::StaticIdentity;
    use crate::storage::MemoryKeyValueStore;
    use chrono::Duration;

    struct Harness {
        store: AnnotationStore,
        gateway: InMemoryGateway,
        identity: StaticIdentity,
        kv: Arc<MemoryKeyValueStore>,
    }

    fn harness(online: bool) -> Harness {
        let gateway = InMemoryGateway::new();
        let identity = StaticIdentity::signed_in("user-1");
        let kv = Arc::new(MemoryKeyValueStore::new());

        let store = AnnotationStore::new(
            Arc::new(gateway.clone()),
            Arc::new(identity.clone()),
            DurableQueueStore::new(kv.clone()),
        );
        store.online.store(online, Ordering::SeqCst);

        Harness {
            store,
            gateway,
            identity,
            kv,
        }
    }

    fn remote_row(id: &str, chapter: &str, position: u32, minutes_ago: i64) -> AnnotationRecord {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        AnnotationRecord {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            book_id: "book1".to_string(),
            chapter_id: chapter.to_string(),
            content: format!("remote {}", id),
            position,
            color: HighlightColor::Green,
            category: None,
            created_at: at,
            updated_at: at,
        }
    }

    async fn add(store: &AnnotationStore, content: &str) -> Annotation {
        store
            .add_annotation("book1", "ch1", content, 0, None, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_generates_unique_ids() {
        let h = harness(true);

        let first = add(&h.store, "one").await;
        let second = add(&h.store, "two").await;

        assert_ne!(first.id, second.id);
        assert_eq!(h.gateway.rows().await.len(), 2);
        assert!(!h.store.has_pending_sync());
    }

    #[tokio::test]
    async fn test_offline_add_is_cached_and_queued() {
        let h = harness(false);

        let annotation = add(&h.store, "hello").await;

        assert_eq!(annotation.content, "hello");
        assert_eq!(annotation.color, HighlightColor::Yellow);
        assert!(h.store.has_pending_sync());

        let cached = h.store.annotations().await;
        assert_eq!(cached.iter().filter(|a| a.chapter_id == "ch1").count(), 1);
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_blank_content() {
        let h = harness(true);

        let result = h
            .store
            .add_annotation("book1", "ch1", "   ", 0, None, None)
            .await;

        assert!(result.is_none());
        assert!(h.store.annotations().await.is_empty());
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_online_add_without_user_is_refused() {
        let h = harness(true);
        h.identity.sign_out();

        let result = h
            .store
            .add_annotation("book1", "ch1", "later", 0, None, None)
            .await;

        assert!(result.is_none());
        assert!(!h.store.has_pending_sync());
        assert!(h.store.annotations().await.is_empty());
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_add_without_user_is_queued() {
        let h = harness(false);
        h.identity.sign_out();

        add(&h.store, "later").await;

        assert!(h.store.has_pending_sync());
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_waits_behind_queued_add() {
        let h = harness(true);
        h.gateway.set_unavailable(true).await;
        let annotation = add(&h.store, "hello").await;
        h.gateway.set_unavailable(false).await;
        h.gateway.clear_calls().await;

        let outcome = h
            .store
            .update_annotation(&annotation.id, "edited", None, None)
            .await;

        assert_eq!(outcome, WriteOutcome::Queued);
        assert!(h.gateway.write_calls().await.is_empty());

        assert_eq!(h.store.force_sync().await, SyncReport::Completed { synced: 2 });
        let rows = h.gateway.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "edited");
    }

    #[tokio::test]
    async fn test_delete_waits_behind_queued_add() {
        let h = harness(true);
        h.gateway.set_unavailable(true).await;
        let annotation = add(&h.store, "hello").await;
        h.gateway.set_unavailable(false).await;
        h.gateway.clear_calls().await;

        assert_eq!(
            h.store.delete_annotation(&annotation.id).await,
            WriteOutcome::Queued
        );
        assert!(h.store.annotations().await.is_empty());

        assert_eq!(h.store.force_sync().await, SyncReport::Completed { synced: 2 });
        assert!(h.gateway.rows().await.is_empty());

        let actions: Vec<&'static str> = h
            .gateway
            .write_calls()
            .await
            .iter()
            .map(|c| match c {
                GatewayCall::Insert(_) => "insert",
                GatewayCall::Delete(_) => "delete",
                _ => "other",
            })
            .collect();
        assert_eq!(actions, vec!["insert", "delete"]);
    }

    #[tokio::test]
    async fn test_failed_insert_is_queued() {
        let h = harness(true);
        h.gateway.set_unavailable(true).await;

        let annotation = add(&h.store, "hello").await;
        let pending = h.store.pending_operations().await;

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, PendingAction::Add);
        assert_eq!(pending[0].data, Some(annotation.draft()));
        assert_eq!(pending[0].timestamp, annotation.created_at.timestamp_millis());
    }

    #[tokio::test]
    async fn test_offline_add_then_force_sync_inserts_once() {
        let h = harness(false);
        let annotation = add(&h.store, "hello").await;

        h.store.online.store(true, Ordering::SeqCst);
        let report = h.store.force_sync().await;

        assert_eq!(report, SyncReport::Completed { synced: 1 });
        let writes = h.gateway.write_calls().await;
        assert_eq!(writes.len(), 1);
        match &writes[0] {
            GatewayCall::Insert(record) => {
                assert_eq!(record.id, annotation.id);
                assert_eq!(record.content, "hello");
                assert_eq!(record.user_id, "user-1");
                assert_eq!(
                    record.created_at.timestamp_millis(),
                    annotation.created_at.timestamp_millis()
                );
            }
            other => panic!("unexpected call: {:?}", other),
        }
        assert!(!h.store.has_pending_sync());
        assert!(DurableQueueStore::new(h.kv.clone())
            .load()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_partial_sync_keeps_failed_entry() {
        let h = harness(false);
        add(&h.store, "a").await;
        let b = add(&h.store, "b").await;
        add(&h.store, "c").await;

        h.gateway.fail_for(&b.id).await;
        h.store.online.store(true, Ordering::SeqCst);
        let report = h.store.force_sync().await;

        assert_eq!(
            report,
            SyncReport::Partial {
                synced: 2,
                remaining: 1
            }
        );
        assert!(!report.is_success());

        let persisted = DurableQueueStore::new(h.kv.clone()).load().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, b.id);
    }

    #[tokio::test]
    async fn test_force_sync_reports_offline_before_empty() {
        let h = harness(false);
        assert_eq!(h.store.force_sync().await, SyncReport::Offline);
        assert!(!h.store.force_sync().await.is_success());

        add(&h.store, "queued").await;

        assert_eq!(h.store.force_sync().await, SyncReport::Offline);
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_force_sync_online_with_empty_queue() {
        let h = harness(true);

        let report = h.store.force_sync().await;

        assert_eq!(report, SyncReport::NothingToSync);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let h = harness(true);

        let outcome = h
            .store
            .update_annotation("missing", "text", None, None)
            .await;

        assert_eq!(outcome, WriteOutcome::NotFound);
        assert!(!outcome.is_success());
        assert!(h.store.pending_operations().await.is_empty());
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_blank_content() {
        let h = harness(true);
        let annotation = add(&h.store, "text").await;

        let outcome = h
            .store
            .update_annotation(&annotation.id, "", None, None)
            .await;

        assert_eq!(outcome, WriteOutcome::Invalid);
        assert_eq!(h.store.annotations().await[0].content, "text");
    }

    #[tokio::test]
    async fn test_update_keeps_color_and_replaces_category() {
        let h = harness(true);
        let annotation = h
            .store
            .add_annotation(
                "book1",
                "ch1",
                "text",
                7,
                Some(HighlightColor::Pink),
                Some(Category::Review),
            )
            .await
            .unwrap();

        let outcome = h
            .store
            .update_annotation(&annotation.id, "edited", None, None)
            .await;

        assert_eq!(outcome, WriteOutcome::Synced);
        let cached = &h.store.annotations().await[0];
        assert_eq!(cached.content, "edited");
        assert_eq!(cached.color, HighlightColor::Pink);
        assert_eq!(cached.category, None);
        assert!(cached.updated_at >= annotation.updated_at);

        let row = &h.gateway.rows().await[0];
        assert_eq!(row.content, "edited");
        assert_eq!(row.category, None);
    }

    #[tokio::test]
    async fn test_failed_update_queues_merged_draft() {
        let h = harness(true);
        let annotation = add(&h.store, "text").await;
        h.gateway.fail_for(&annotation.id).await;

        let outcome = h
            .store
            .update_annotation(
                &annotation.id,
                "edited",
                Some(HighlightColor::Blue),
                Some(Category::Question),
            )
            .await;

        assert_eq!(outcome, WriteOutcome::Queued);
        let pending = h.store.pending_operations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, PendingAction::Update);

        let data = pending[0].data.as_ref().unwrap();
        assert_eq!(data.content, "edited");
        assert_eq!(data.color, HighlightColor::Blue);
        assert_eq!(data.category, Some(Category::Question));
        assert_eq!(data.chapter_id, "ch1");
        assert_eq!(data.position, 0);
    }

    #[tokio::test]
    async fn test_online_delete_failure_queues_delete() {
        let h = harness(true);
        h.gateway.seed(remote_row("r1", "ch1", 3, 0)).await;
        h.store.get_chapter_annotations("ch1").await;
        h.gateway.fail_for("r1").await;

        let outcome = h.store.delete_annotation("r1").await;

        assert_eq!(outcome, WriteOutcome::Queued);
        let pending = h.store.pending_operations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, PendingAction::Delete);
        assert_eq!(pending[0].data, None);
        assert!(h.store.annotations().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_looks_up_uncached_remote_row() {
        let h = harness(true);
        h.gateway.seed(remote_row("r1", "ch1", 3, 0)).await;

        assert_eq!(h.store.delete_annotation("r1").await, WriteOutcome::Synced);
        assert!(h.gateway.rows().await.is_empty());
        assert_eq!(
            h.store.delete_annotation("r1").await,
            WriteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_offline_delete_of_uncached_id_is_not_found() {
        let h = harness(false);

        assert_eq!(
            h.store.delete_annotation("r1").await,
            WriteOutcome::NotFound
        );
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_chapter_fetch_merges_into_cache() {
        let h = harness(true);
        h.gateway.seed(remote_row("r2", "ch1", 20, 0)).await;
        h.gateway.seed(remote_row("r1", "ch1", 10, 0)).await;
        h.gateway.seed(remote_row("other", "ch2", 0, 0)).await;

        let fetched = h.store.get_chapter_annotations("ch1").await;

        assert!(matches!(fetched, Fetched::Remote(_)));
        let positions: Vec<u32> = fetched.annotations().iter().map(|a| a.position).collect();
        assert_eq!(positions, vec![10, 20]);
        assert_eq!(h.store.annotations().await.len(), 2);

        // A second fetch replaces the chapter instead of duplicating it
        h.store.get_chapter_annotations("ch1").await;
        assert_eq!(h.store.annotations().await.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_keeps_entries_with_pending_ops() {
        let h = harness(false);
        let local = add(&h.store, "local").await;

        h.gateway.seed(remote_row("r1", "ch1", 1, 0)).await;
        h.store.online.store(true, Ordering::SeqCst);

        let fetched = h.store.get_chapter_annotations("ch1").await;

        assert_eq!(fetched.annotations().len(), 1);
        let cached: Vec<String> = h.store.annotations().await.into_iter().map(|a| a.id).collect();
        assert!(cached.contains(&local.id));
        assert!(cached.contains(&"r1".to_string()));
    }

    #[tokio::test]
    async fn test_merge_does_not_resurrect_pending_delete() {
        let h = harness(true);
        h.gateway.seed(remote_row("r1", "ch1", 1, 0)).await;
        h.store.get_chapter_annotations("ch1").await;

        h.store.online.store(false, Ordering::SeqCst);
        assert_eq!(h.store.delete_annotation("r1").await, WriteOutcome::Queued);

        h.store.online.store(true, Ordering::SeqCst);
        h.store.get_chapter_annotations("ch1").await;

        assert!(h.store.annotations().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_reads_use_cache() {
        let h = harness(true);
        h.gateway.seed(remote_row("old", "ch1", 30, 10)).await;
        h.gateway.seed(remote_row("new", "ch2", 5, 1)).await;
        h.store.get_book_annotations("book1").await;

        h.store.online.store(false, Ordering::SeqCst);
        h.gateway.clear_calls().await;

        let by_book = h.store.get_book_annotations("book1").await;
        assert!(by_book.is_offline());
        let ids: Vec<&str> = by_book.annotations().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);

        let by_chapter = h.store.get_chapter_annotations("ch2").await;
        assert_eq!(by_chapter.annotations().len(), 1);
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_book_fetch_requires_user() {
        let h = harness(true);
        h.identity.sign_out();

        let fetched = h.store.get_book_annotations("book1").await;

        assert_eq!(
            fetched.error().map(|e| e.kind),
            Some(FetchFailure::Unauthenticated)
        );
        assert!(fetched.into_annotations().is_empty());
        assert!(h.gateway.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_gateway_error_yields_failed_read() {
        let h = harness(true);
        h.gateway.set_unavailable(true).await;

        let fetched = h.store.get_chapter_annotations("ch1").await;

        assert_eq!(fetched.error().map(|e| e.kind), Some(FetchFailure::Rejected));
        assert!(fetched.annotations().is_empty());
    }

    #[tokio::test]
    async fn test_category_fetch_leaves_cache_alone() {
        let h = harness(true);
        let mut row = remote_row("r1", "ch1", 1, 0);
        row.category = Some(Category::Vocabulary);
        h.gateway.seed(row).await;
        h.gateway.seed(remote_row("r2", "ch1", 2, 0)).await;

        let fetched = h
            .store
            .get_annotations_by_category("book1", Category::Vocabulary)
            .await;

        assert_eq!(fetched.annotations().len(), 1);
        assert_eq!(fetched.annotations()[0].id, "r1");
        assert!(h.store.annotations().await.is_empty());
    }

    #[tokio::test]
    async fn test_coming_online_drains_queue() {
        let h = harness(false);
        add(&h.store, "queued").await;

        h.store.set_online(true).await;

        assert!(!h.store.has_pending_sync());
        assert_eq!(h.gateway.rows().await.len(), 1);

        // Already online; no further drain
        h.gateway.clear_calls().await;
        h.store.set_online(true).await;
        assert!(h.gateway.calls().await.is_empty());
    }

    #[test]
    fn test_fetch_error_classification() {
        assert_eq!(
            FetchError::from(&AppError::gateway(401, "JWT expired")).kind,
            FetchFailure::Unauthenticated
        );
        assert_eq!(
            FetchError::from(&AppError::gateway(400, "bad filter")).kind,
            FetchFailure::Rejected
        );

        let decode = serde_json::from_str::<Vec<Annotation>>("{").unwrap_err();
        assert_eq!(
            FetchError::from(&AppError::from(decode)).kind,
            FetchFailure::Decode
        );
    }

    #[test]
    fn test_write_outcome_success_view() {
        assert!(WriteOutcome::Synced.is_success());
        assert!(WriteOutcome::Queued.is_success());
        assert!(!WriteOutcome::Invalid.is_success());
    }
}
