//! Connectivity signal
//!
//! The queue does not detect connectivity itself. Something outside sets
//! the [`ConnectivityMonitor`] online or offline: tests do it directly,
//! the daemon does it from periodic backend health probes via
//! [`run_health_probe`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tidepool_core::ports::IRemoteBackend;

/// Shared online/offline flag with change notification
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Updates the flag; returns `true` if it changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver notified on every change
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Probes the backend every `interval` and feeds the result into `monitor`
///
/// Runs until `cancel` fires. The first probe happens immediately.
pub async fn run_health_probe(
    remote: Arc<dyn IRemoteBackend>,
    monitor: ConnectivityMonitor,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let healthy = remote.health_check().await;
                debug!(healthy, "Health probe");
                monitor.set_online(healthy);
            }
        }
    }
    debug!("Health probe stopped");
}
