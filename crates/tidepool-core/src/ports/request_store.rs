//! Request store port (driven/secondary port)
//!
//! Durable storage for the offline request queue. Queued requests must
//! survive process restarts, so the queue never keeps them only in memory.

use chrono::{DateTime, Utc};

use crate::domain::{QueuedRequest, SyncError};

/// Port trait for persisting [`QueuedRequest`]s
#[async_trait::async_trait]
pub trait IRequestStore: Send + Sync {
    /// Stores a new request
    async fn insert(&self, request: &QueuedRequest) -> Result<(), SyncError>;

    /// All pending requests, oldest `timestamp` first
    async fn list_pending(&self) -> Result<Vec<QueuedRequest>, SyncError>;

    /// Overwrites a stored request (attempts, next retry, status)
    async fn update(&self, request: &QueuedRequest) -> Result<(), SyncError>;

    /// Removes a request, returning whether it existed
    async fn delete(&self, id: &str) -> Result<bool, SyncError>;

    /// Number of pending requests
    async fn count_pending(&self) -> Result<u64, SyncError>;

    /// Earliest `timestamp` among pending requests
    async fn oldest_timestamp(&self) -> Result<Option<DateTime<Utc>>, SyncError>;

    /// Removes every stored request, returning how many were removed
    async fn clear(&self) -> Result<u64, SyncError>;
}
