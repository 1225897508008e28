//! Cache store port (driven/secondary port)
//!
//! Optional persistent backing for named caches. The cache layer keeps its
//! working set in memory and writes through to this store so cached values
//! survive restarts.

use crate::domain::{CacheEntry, SyncError};

/// Port trait for persisting [`CacheEntry`]s grouped by cache name
#[async_trait::async_trait]
pub trait ICacheStore: Send + Sync {
    /// Inserts or replaces an entry
    async fn put(&self, cache: &str, entry: &CacheEntry) -> Result<(), SyncError>;

    /// Looks up an entry
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>, SyncError>;

    /// Every entry of a cache, oldest first
    async fn load(&self, cache: &str) -> Result<Vec<CacheEntry>, SyncError>;

    /// Removes the given keys from a cache
    async fn delete(&self, cache: &str, keys: &[String]) -> Result<(), SyncError>;

    /// Removes every entry of a cache
    async fn clear(&self, cache: &str) -> Result<(), SyncError>;
}
