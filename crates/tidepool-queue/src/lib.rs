//! Tidepool Queue - Durable offline request queue
//!
//! Outbound HTTP requests that cannot be delivered while the device is
//! offline are persisted through the `IRequestStore` port and replayed
//! oldest-first once connectivity returns. Failed replays back off
//! exponentially; a request that keeps failing is eventually dropped.
//!
//! ## Modules
//!
//! - [`queue`] - [`OfflineQueue`]: enqueue, replay, status, direct send
//! - [`transport`] - [`IRequestTransport`] and its reqwest implementation
//! - [`connectivity`] - [`ConnectivityMonitor`] and the health probe loop

pub mod connectivity;
pub mod queue;
pub mod transport;

pub use connectivity::{run_health_probe, ConnectivityMonitor};
pub use queue::{OfflineQueue, QueueStatus, ReplayOutcome, ReplaySummary, SendOutcome};
pub use transport::{HttpTransport, IRequestTransport};

use thiserror::Error;
use tidepool_core::domain::{DomainError, SyncError};

/// Errors that can occur in the offline queue
#[derive(Debug, Error)]
pub enum QueueError {
    /// The request store failed
    #[error("Request store error: {0}")]
    Store(#[from] SyncError),

    /// The request could not be delivered (connection, DNS, timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<DomainError> for QueueError {
    fn from(e: DomainError) -> Self {
        QueueError::InvalidRequest(e.to_string())
    }
}

impl From<QueueError> for SyncError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Store(inner) => inner,
            QueueError::Transport(msg) => SyncError::Network(msg),
            QueueError::InvalidRequest(msg) => {
                SyncError::Domain(DomainError::ValidationFailed(msg))
            }
        }
    }
}
