//! Tidepool Remote - REST backend client
//!
//! Provides an async client for a PostgREST-style backend:
//! - Full-table reads (`GET /rest/v1/{table}?select=*`)
//! - Batched upserts keyed on a conflict column
//! - Health probes with a short timeout
//! - Schema discovery through the OpenAPI root document
//! - Exact row counts through `Content-Range`
//!
//! ## Modules
//!
//! - [`client`] - HTTP plumbing and typed endpoint calls
//! - [`provider`] - `IRemoteBackend` implementation over the client
//! - [`rate_limit`] - `Retry-After` parsing for throttled responses

pub mod client;
pub mod provider;
pub mod rate_limit;

pub use client::RestClient;
pub use provider::RestBackend;

use std::time::Duration;

use thiserror::Error;
use tidepool_core::domain::SyncError;

/// Errors that can occur when communicating with the REST backend
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure: connection refused, DNS, timeout
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected a batch as malformed or violating a constraint
    /// (400, 409, 422)
    #[error("Conflict ({status}): {message}")]
    Conflict {
        /// HTTP status code
        status: u16,
        /// Message extracted from the error body
        message: String,
    },

    /// Any other non-success response
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Message extracted from the error body
        message: String,
    },

    /// Still throttled after exhausting the rate-limit retries
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration the backend last asked us to wait
        retry_after: Duration,
    },

    /// The response body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A record was rejected before sending
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The backend offers no usable schema listing
    #[error("Schema discovery unavailable: {0}")]
    DiscoveryUnavailable(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Network(format!("request timed out: {e}"))
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Network(msg) => SyncError::Network(msg),
            RemoteError::Conflict { status, message } => {
                SyncError::Conflict(format!("HTTP {status}: {message}"))
            }
            RemoteError::Http { status, message } => SyncError::Backend { status, message },
            RemoteError::TooManyRequests { retry_after } => SyncError::Backend {
                status: 429,
                message: format!("rate limited, retry after {}s", retry_after.as_secs()),
            },
            // Status 0: a response arrived but could not be interpreted
            RemoteError::InvalidResponse(msg) => SyncError::Backend {
                status: 0,
                message: msg,
            },
            RemoteError::InvalidRecord(msg) => SyncError::Conflict(msg),
            RemoteError::DiscoveryUnavailable(msg) => SyncError::DiscoveryUnavailable(msg),
        }
    }
}
