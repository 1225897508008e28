//! Tidepool Cache - Named caches with expiry and fetch strategies
//!
//! Each named cache has a maximum entry age, a maximum entry count and a
//! default [`CacheStrategy`](tidepool_core::domain::CacheStrategy) that
//! decides how [`CacheManager::execute_strategy`] combines cached values
//! with a network fetch.
//!
//! Entries live in memory and are mirrored into an `ICacheStore` when one
//! is attached, so they survive a restart.

pub mod manager;

pub use manager::{CacheManager, CachePolicy, CacheStats};

use thiserror::Error;
use tidepool_core::domain::SyncError;

/// Errors that can occur in the caching layer
#[derive(Debug, Error)]
pub enum CacheError {
    /// No cache with this name is configured
    #[error("Unknown cache: {0}")]
    UnknownCache(String),

    /// The persistent cache store failed
    #[error("Cache store error: {0}")]
    Store(#[from] SyncError),

    /// The fetch failed and no cached value could stand in
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// A value could not be converted to or from JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CacheError> for SyncError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Store(inner) => inner,
            CacheError::Fetch(msg) => SyncError::Network(msg),
            other => SyncError::LocalStore(other.to_string()),
        }
    }
}
