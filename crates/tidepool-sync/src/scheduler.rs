//! Automatic sync scheduling
//!
//! [`SyncOrchestrator::start_auto_sync`] spawns a background task that runs
//! a full pass on a fixed interval, starting immediately. Stopping cancels
//! future runs only: a pass already in progress finishes normally.
//! [`SyncOrchestrator::stop_auto_sync_and_wait`] also waits for that pass.
//!
//! The task holds a weak reference to its orchestrator and exits on its own
//! once the orchestrator is dropped.

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tidepool_core::domain::{DomainError, SyncError};

use crate::orchestrator::{SyncOrchestrator, SyncOutcome};

/// Handle of a running auto-sync task
pub(crate) struct AutoSyncHandle {
    cancel: CancellationToken,
    interval: Duration,
    task: JoinHandle<()>,
}

impl SyncOrchestrator {
    /// Starts periodic sync passes every `interval`
    ///
    /// A previously started timer is stopped and replaced.
    ///
    /// # Errors
    /// A zero `interval` is rejected with [`SyncError::Domain`] and leaves
    /// any running timer untouched.
    pub fn start_auto_sync(self: &Arc<Self>, interval: Duration) -> Result<(), SyncError> {
        if interval.is_zero() {
            return Err(DomainError::ValidationFailed(
                "auto-sync interval must be positive".to_string(),
            )
            .into());
        }
        self.stop_auto_sync();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let weak = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(orchestrator) = weak.upgrade() else { break };

                        match orchestrator.sync_all().await {
                            Ok(SyncOutcome::Completed(report)) => {
                                debug!(pushed = report.records_pushed(), "Automatic sync pass finished");
                            }
                            Ok(SyncOutcome::AlreadyRunning) => {
                                debug!("Skipping automatic pass, another pass is running");
                            }
                            Err(SyncError::PartialFailure { failed_tables }) => {
                                warn!(failed = ?failed_tables, "Automatic sync pass had failures");
                            }
                            Err(e) => {
                                warn!(error = %e, "Automatic sync pass failed");
                            }
                        }

                        if !token.is_cancelled() {
                            let next = Utc::now()
                                + chrono::Duration::from_std(interval)
                                    .unwrap_or_else(|_| chrono::Duration::zero());
                            orchestrator.update_status(|s| s.next_sync = Some(next));
                        }
                    }
                }
            }
            debug!("Auto-sync task exited");
        });

        info!(interval_ms = interval.as_millis() as u64, "Auto-sync started");
        *self.auto_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(AutoSyncHandle {
            cancel,
            interval,
            task,
        });
        Ok(())
    }

    /// Stops future automatic passes
    ///
    /// Returns `false` if auto-sync was not running.
    pub fn stop_auto_sync(&self) -> bool {
        self.cancel_auto_sync().is_some()
    }

    /// Stops future automatic passes and waits for a pass that is already
    /// running to finish
    ///
    /// Returns `false` if auto-sync was not running.
    pub async fn stop_auto_sync_and_wait(&self) -> bool {
        let Some(task) = self.cancel_auto_sync() else {
            return false;
        };
        if let Err(e) = task.await {
            warn!(error = %e, "Auto-sync task ended abnormally");
        }
        true
    }

    fn cancel_auto_sync(&self) -> Option<JoinHandle<()>> {
        let handle = self
            .auto_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        handle.cancel.cancel();
        self.update_status(|s| s.next_sync = None);
        info!("Auto-sync stopped");
        Some(handle.task)
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.auto_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Interval of the running auto-sync timer
    pub fn auto_sync_interval(&self) -> Option<Duration> {
        self.auto_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| h.interval)
    }
}
