//! Services module
//!
//! The annotation store, its pending queue and the connectivity-driven
//! sync lifecycle.

pub mod annotations;
pub mod queue;
pub mod sync;

pub use annotations::{
    AnnotationStore, FetchError, FetchFailure, Fetched, SyncReport, WriteOutcome,
};
pub use queue::{DrainSummary, PendingQueue};
pub use sync::SyncSubscription;
