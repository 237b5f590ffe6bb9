//! Application state and initialization
//!
//! Builds the annotation store from configuration and keeps its sync
//! subscription alive for as long as the host holds the app.

use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::database::{create_pool, Repository};
use crate::error::Result;
use crate::gateway::{AnnotationGateway, RestGateway};
use crate::identity::IdentityProvider;
use crate::services::{AnnotationStore, SyncSubscription};
use crate::storage::{DurableQueueStore, SqliteKeyValueStore};

/// A running annotation engine
pub struct AnnotationsApp {
    store: AnnotationStore,
    subscription: Option<SyncSubscription>,
    pool: Option<SqlitePool>,
}

impl AnnotationsApp {
    /// Open the local database, connect to the remote service and start
    /// following connectivity changes.
    pub async fn open(
        config: &AppConfig,
        identity: Arc<dyn IdentityProvider>,
        monitor: Arc<dyn ConnectivityMonitor>,
    ) -> Result<Self> {
        tracing::info!("Initializing annotation engine");
        tracing::info!("Database path: {:?}", config.database_path);

        let pool = create_pool(&config.database_path).await?;
        let kv = Arc::new(SqliteKeyValueStore::new(Repository::new(pool.clone())));
        let gateway = Arc::new(RestGateway::new(config)?.with_identity(identity.clone()));

        let mut app =
            Self::from_parts(gateway, identity, DurableQueueStore::new(kv), monitor).await;
        app.pool = Some(pool);

        tracing::info!("Annotation engine initialized successfully");

        Ok(app)
    }

    /// Assemble the engine from already-built parts
    pub async fn from_parts(
        gateway: Arc<dyn AnnotationGateway>,
        identity: Arc<dyn IdentityProvider>,
        queue_store: DurableQueueStore,
        monitor: Arc<dyn ConnectivityMonitor>,
    ) -> Self {
        let store = AnnotationStore::new(gateway, identity, queue_store);
        let subscription = store.start(monitor).await;

        Self {
            store,
            subscription: Some(subscription),
            pool: None,
        }
    }

    pub fn store(&self) -> &AnnotationStore {
        &self.store
    }

    /// Stop following connectivity and close the local database
    pub async fn shutdown(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.shutdown().await;
        }
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }

        tracing::info!("Annotation engine stopped");
    }
}
