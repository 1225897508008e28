//! Offline request queue
//!
//! [`OfflineQueue`] persists requests through an `IRequestStore` and replays
//! them through an [`IRequestTransport`].
//!
//! ## Replay rules
//!
//! - Requests are replayed oldest-first by creation timestamp.
//! - Only requests whose `next_retry_at` has passed are attempted.
//! - A 2xx response deletes the request. Anything else (transport error,
//!   non-2xx status) is a failed attempt: `attempts` grows and the request
//!   is retried after `min(cap, base * 2^attempts)`, or dropped once
//!   `attempts` reaches `max_attempts`.
//! - A replay already in flight turns further calls into no-ops.
//! - Per-request failures are logged, never returned. Only request store
//!   failures propagate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tidepool_core::domain::{BackoffPolicy, QueuedRequest};
use tidepool_core::ports::IRequestStore;

use crate::connectivity::ConnectivityMonitor;
use crate::transport::IRequestTransport;
use crate::QueueError;

// ============================================================================
// Results
// ============================================================================

/// Snapshot of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Requests waiting for replay
    pub queued_requests: u64,
    /// Creation time of the oldest waiting request
    pub oldest: Option<DateTime<Utc>>,
}

/// Counters of one replay run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub attempted: u64,
    pub sent: u64,
    /// Failed attempts that will be retried later
    pub retried: u64,
    /// Requests dropped after exhausting their attempts
    pub dropped: u64,
    /// Requests not yet due
    pub deferred: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed(ReplaySummary),
    /// Another replay was in flight
    AlreadyRunning,
    /// The connectivity monitor reports offline; nothing was attempted
    Offline,
}

/// Result of [`OfflineQueue::send_or_enqueue`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered directly; carries the response status
    Sent(u16),
    /// Persisted for later replay; carries the queued request id
    Queued(String),
}

// ============================================================================
// OfflineQueue
// ============================================================================

/// Durable queue of outbound requests
pub struct OfflineQueue {
    store: Arc<dyn IRequestStore>,
    transport: Arc<dyn IRequestTransport>,
    policy: BackoffPolicy,
    connectivity: ConnectivityMonitor,
    processing: AtomicBool,
}

/// Clears the processing flag when a replay ends
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineQueue {
    /// Creates a queue that considers itself online until told otherwise
    pub fn new(
        store: Arc<dyn IRequestStore>,
        transport: Arc<dyn IRequestTransport>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            policy,
            connectivity: ConnectivityMonitor::default(),
            processing: AtomicBool::new(false),
        }
    }

    /// Uses a shared connectivity monitor
    pub fn with_connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.connectivity = monitor;
        self
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Persists a request for later replay, without any network I/O
    ///
    /// Returns the request id.
    pub async fn enqueue(&self, request: QueuedRequest) -> Result<String, QueueError> {
        self.store.insert(&request).await?;
        info!(id = %request.id, method = %request.method, url = %request.url, "Queued request");
        Ok(request.id)
    }

    /// Sends a request now if online, otherwise queues it
    ///
    /// A transport failure also queues the request. A response with any
    /// status counts as delivered.
    pub async fn send_or_enqueue(&self, request: QueuedRequest) -> Result<SendOutcome, QueueError> {
        if self.connectivity.is_online() {
            match self.transport.send(&request).await {
                Ok(status) => return Ok(SendOutcome::Sent(status)),
                Err(QueueError::Transport(e)) => {
                    warn!(url = %request.url, error = %e, "Direct send failed, queueing");
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!(url = %request.url, "Offline, queueing");
        }
        let id = self.enqueue(request).await?;
        Ok(SendOutcome::Queued(id))
    }

    /// Replays every due request
    pub async fn process_queue(&self) -> Result<ReplayOutcome, QueueError> {
        self.process_queue_at(Utc::now()).await
    }

    /// Replays every request due at `now`
    #[tracing::instrument(skip(self))]
    pub async fn process_queue_at(&self, now: DateTime<Utc>) -> Result<ReplayOutcome, QueueError> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping queue replay");
            return Ok(ReplayOutcome::Offline);
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Queue replay already running");
            return Ok(ReplayOutcome::AlreadyRunning);
        }
        let _guard = ReplayGuard(&self.processing);

        let pending = self.store.list_pending().await?;
        let mut summary = ReplaySummary::default();

        for mut request in pending {
            if !request.is_due(now) {
                summary.deferred += 1;
                continue;
            }
            summary.attempted += 1;

            let failure = match self.transport.send(&request).await {
                Ok(status) if (200..300).contains(&status) => None,
                Ok(status) => Some(format!("HTTP {status}")),
                Err(e) => Some(e.to_string()),
            };

            match failure {
                None => {
                    request.mark_sent();
                    self.store.delete(&request.id).await?;
                    summary.sent += 1;
                    debug!(id = %request.id, "Replayed queued request");
                }
                Some(reason) => {
                    if request.record_failure(now, &self.policy) {
                        self.store.delete(&request.id).await?;
                        summary.dropped += 1;
                        warn!(
                            id = %request.id,
                            url = %request.url,
                            attempts = request.attempts,
                            reason = %reason,
                            "Dropping queued request after max attempts"
                        );
                    } else {
                        self.store.update(&request).await?;
                        summary.retried += 1;
                        debug!(
                            id = %request.id,
                            attempts = request.attempts,
                            next_retry_at = %request.next_retry_at,
                            reason = %reason,
                            "Queued request failed, will retry"
                        );
                    }
                }
            }
        }

        if summary.attempted > 0 {
            info!(
                attempted = summary.attempted,
                sent = summary.sent,
                retried = summary.retried,
                dropped = summary.dropped,
                "Queue replay finished"
            );
        }
        Ok(ReplayOutcome::Completed(summary))
    }

    /// Number of waiting requests and the age of the oldest
    pub async fn get_queue_status(&self) -> Result<QueueStatus, QueueError> {
        Ok(QueueStatus {
            queued_requests: self.store.count_pending().await?,
            oldest: self.store.oldest_timestamp().await?,
        })
    }

    /// Deletes every queued request; returns how many were removed
    pub async fn clear_queue(&self) -> Result<u64, QueueError> {
        let removed = self.store.clear().await?;
        info!(removed, "Cleared request queue");
        Ok(removed)
    }

    /// Replays the queue once at spawn, then on every offline→online
    /// transition and, if given, on a fixed interval while online
    ///
    /// Runs until `cancel` fires.
    pub fn spawn_auto_processing(
        self: &Arc<Self>,
        interval: Option<Duration>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        let mut rx = self.connectivity.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval.filter(|i| !i.is_zero()).map(|i| {
                let mut t = tokio::time::interval_at(tokio::time::Instant::now() + i, i);
                t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                t
            });
            let mut was_online = *rx.borrow_and_update();

            // Requests left over from a previous run go out without waiting
            // for a tick or a reconnect
            if was_online {
                queue.replay_logged().await;
            }

            loop {
                let tick = async {
                    match ticker.as_mut() {
                        Some(t) => {
                            t.tick().await;
                        }
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *rx.borrow_and_update();
                        if online && !was_online {
                            info!("Back online, replaying queue");
                            queue.replay_logged().await;
                        }
                        was_online = online;
                    }
                    _ = tick => {
                        queue.replay_logged().await;
                    }
                }
            }
            debug!("Queue auto-processing stopped");
        })
    }

    async fn replay_logged(&self) {
        if let Err(e) = self.process_queue().await {
            warn!(error = %e, "Queue replay failed");
        }
    }
}
