//! annosync library
//!
//! Offline-tolerant annotation storage: reads and writes go to the remote
//! service when possible and are queued durably when not, then replayed
//! once connectivity returns.

pub mod app;
pub mod config;
pub mod connectivity;
pub mod database;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod logging;
pub mod services;
pub mod storage;

pub use app::AnnotationsApp;
pub use error::{AppError, Result};
pub use services::{AnnotationStore, Fetched, SyncReport, WriteOutcome};
