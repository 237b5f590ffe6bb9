//! Connectivity monitoring
//!
//! The platform network observer is bridged in through `NetworkStatus`;
//! consumers read the current state or subscribe to transitions.

use std::sync::Arc;
use tokio::sync::watch;

pub trait ConnectivityMonitor: Send + Sync {
    /// Whether the device is currently online
    fn current_state(&self) -> bool;

    /// Stream of state changes. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state fed by a platform bridge
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    sender: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Record a state reported by the platform.
    ///
    /// Subscribers are only notified on an actual transition. Returns
    /// whether the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            tracing::info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }

        changed
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityMonitor for NetworkStatus {
    fn current_state(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}
