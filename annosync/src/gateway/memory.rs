//! In-process annotation backend.
//!
//! Keeps rows in memory and records every call in order. Failures can be
//! injected per annotation id or for the whole service, which makes it the
//! backend of choice for exercising queueing and drain behavior.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::AnnotationGateway;
use crate::database::{Annotation, AnnotationPatch, AnnotationRecord, Category};
use crate::error::{AppError, Result};

/// A call received by the gateway, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Insert(AnnotationRecord),
    Update { id: String, patch: AnnotationPatch },
    Delete(String),
    SelectByBook(String),
    SelectByChapter(String),
    SelectById(String),
    SelectByCategory { book_id: String, category: Category },
}

impl GatewayCall {
    /// Annotation id targeted by a write call
    pub fn target_id(&self) -> Option<&str> {
        match self {
            GatewayCall::Insert(record) => Some(record.id.as_str()),
            GatewayCall::Update { id, .. } | GatewayCall::Delete(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

#[derive(Default)]
struct State {
    rows: Vec<AnnotationRecord>,
    calls: Vec<GatewayCall>,
    /// Status returned for calls targeting an id
    failing_ids: HashMap<String, u16>,
    unavailable: bool,
}

impl State {
    fn check(&self, id: Option<&str>) -> Result<()> {
        if self.unavailable {
            return Err(AppError::gateway(503, "Service unavailable"));
        }
        if let Some(status) = id.and_then(|id| self.failing_ids.get(id)) {
            return Err(AppError::gateway(*status, "Injected failure"));
        }
        Ok(())
    }

    fn select<F>(&self, filter: F) -> Vec<Annotation>
    where
        F: Fn(&AnnotationRecord) -> bool,
    {
        self.rows
            .iter()
            .filter(|r| filter(*r))
            .cloned()
            .map(AnnotationRecord::into_annotation)
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<State>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call for this annotation id fail with a server error
    pub async fn fail_for(&self, id: &str) {
        self.fail_with(id, 500).await;
    }

    /// Make every call for this annotation id fail with `status`
    pub async fn fail_with(&self, id: &str, status: u16) {
        self.state
            .lock()
            .await
            .failing_ids
            .insert(id.to_string(), status);
    }

    pub async fn recover(&self, id: &str) {
        self.state.lock().await.failing_ids.remove(id);
    }

    /// Make every call fail, as during an outage
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Seed a row without recording a call
    pub async fn seed(&self, record: AnnotationRecord) {
        self.state.lock().await.rows.push(record);
    }

    pub async fn rows(&self) -> Vec<AnnotationRecord> {
        self.state.lock().await.rows.clone()
    }

    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    /// Write calls only (inserts, updates, deletes)
    pub async fn write_calls(&self) -> Vec<GatewayCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.target_id().is_some())
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }
}

#[async_trait]
impl AnnotationGateway for InMemoryGateway {
    async fn insert(&self, record: &AnnotationRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::Insert(record.clone()));
        state.check(Some(record.id.as_str()))?;

        if state.rows.iter().any(|r| r.id == record.id) {
            return Err(AppError::gateway(
                409,
                format!("duplicate key value violates unique constraint: {}", record.id),
            ));
        }
        state.rows.push(record.clone());
        Ok(())
    }

    async fn update(&self, id: &str, patch: &AnnotationPatch) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::Update {
            id: id.to_string(),
            patch: patch.clone(),
        });
        state.check(Some(id))?;

        // Filtered updates matching no row succeed, as over REST
        if let Some(row) = state.rows.iter_mut().find(|r| r.id == id) {
            row.content = patch.content.clone();
            row.color = patch.color;
            row.category = patch.category;
            row.updated_at = patch.updated_at;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::Delete(id.to_string()));
        state.check(Some(id))?;

        state.rows.retain(|r| r.id != id);
        Ok(())
    }

    async fn select_by_book(&self, book_id: &str) -> Result<Vec<Annotation>> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::SelectByBook(book_id.to_string()));
        state.check(None)?;

        let mut rows = state.select(|r| r.book_id == book_id);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn select_by_chapter(&self, chapter_id: &str) -> Result<Vec<Annotation>> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(GatewayCall::SelectByChapter(chapter_id.to_string()));
        state.check(None)?;

        let mut rows = state.select(|r| r.chapter_id == chapter_id);
        rows.sort_by_key(|a| a.position);
        Ok(rows)
    }

    async fn select_by_id(&self, id: &str) -> Result<Option<Annotation>> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::SelectById(id.to_string()));
        state.check(None)?;

        Ok(state.select(|r| r.id == id).into_iter().next())
    }

    async fn select_by_category(
        &self,
        book_id: &str,
        category: Category,
    ) -> Result<Vec<Annotation>> {
        let mut state = self.state.lock().await;
        state.calls.push(GatewayCall::SelectByCategory {
            book_id: book_id.to_string(),
            category,
        });
        state.check(None)?;

        let mut rows = state.select(|r| r.book_id == book_id && r.category == Some(category));
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
