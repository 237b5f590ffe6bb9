//! Remote annotation gateway
//!
//! Contract for the hosted data service holding the `annotations`
//! collection. Every call is an independent network request that may fail;
//! there is no batching and no transaction across calls.

pub mod memory;
pub mod rest;

pub use memory::{GatewayCall, InMemoryGateway};
pub use rest::RestGateway;

use crate::database::{Annotation, AnnotationPatch, AnnotationRecord, Category};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait AnnotationGateway: Send + Sync {
    async fn insert(&self, record: &AnnotationRecord) -> Result<()>;

    async fn update(&self, id: &str, patch: &AnnotationPatch) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Annotations of a book, newest first
    async fn select_by_book(&self, book_id: &str) -> Result<Vec<Annotation>>;

    /// Annotations of a chapter, ascending by position
    async fn select_by_chapter(&self, chapter_id: &str) -> Result<Vec<Annotation>>;

    async fn select_by_id(&self, id: &str) -> Result<Option<Annotation>>;

    /// Annotations of a book in one category, newest first
    async fn select_by_category(&self, book_id: &str, category: Category)
        -> Result<Vec<Annotation>>;
}
