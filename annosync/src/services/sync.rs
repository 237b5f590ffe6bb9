//! Sync lifecycle
//!
//! Wires an `AnnotationStore` to a connectivity monitor: the store follows
//! every reported state and drains its queue when the device comes back
//! online.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::annotations::AnnotationStore;
use crate::connectivity::ConnectivityMonitor;

/// Handle to a running connectivity listener.
///
/// Cancelling (or dropping) the handle stops the listener; no event is
/// acted upon after that.
pub struct SyncSubscription {
    active: Arc<AtomicBool>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SyncSubscription {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn cancel(&mut self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!("Cancelling connectivity subscription");
        }
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Cancel and wait for the listener task to exit
    pub async fn shutdown(mut self) {
        self.cancel();

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Connectivity listener task failed: {}", e);
            }
        }
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl AnnotationStore {
    /// Restore the persisted queue and start following `monitor`.
    ///
    /// If the device is online and operations are pending, a drain runs
    /// right away in the background.
    pub async fn start(&self, monitor: Arc<dyn ConnectivityMonitor>) -> SyncSubscription {
        // Subscribe before reading so no transition slips in between
        let mut changes = monitor.subscribe();
        let online = *changes.borrow_and_update();
        self.online.store(online, Ordering::SeqCst);

        self.restore_pending().await;

        let active = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let store = self.clone();
        let flag = active.clone();

        let handle = tokio::spawn(async move {
            if online && store.has_pending_sync() && flag.load(Ordering::SeqCst) {
                store.sync_pending().await;
            }

            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown_rx => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Connectivity monitor closed");
                            break;
                        }
                        if !flag.load(Ordering::SeqCst) {
                            break;
                        }

                        let online = *changes.borrow_and_update();
                        store.set_online(online).await;
                    }
                }
            }

            tracing::debug!("Connectivity listener stopped");
        });

        tracing::info!(
            "Annotation sync started ({})",
            if online { "online" } else { "offline" }
        );

        SyncSubscription {
            active,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Re-read the monitor's state on demand. Returns whether online.
    pub async fn refresh_connectivity(&self, monitor: &dyn ConnectivityMonitor) -> bool {
        let online = monitor.current_state();
        self.set_online(online).await;
        online
    }
}
