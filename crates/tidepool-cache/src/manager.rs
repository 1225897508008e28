//! Cache manager
//!
//! [`CacheManager`] owns every named cache. It is cheap to clone; clones
//! share the same caches.
//!
//! ## Bounds
//!
//! Each `set` first drops the expired entries of that cache, then evicts
//! the oldest entries (by write time, then by insertion order) until the
//! cache is within `max_entries`. Reads treat an expired entry as absent.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tidepool_core::config::{CacheConfig, CachePolicyConfig};
use tidepool_core::domain::{CacheEntry, CacheStrategy};
use tidepool_core::ports::ICacheStore;

use crate::CacheError;

// ============================================================================
// Policies
// ============================================================================

/// Bounds and default strategy of one named cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub strategy: CacheStrategy,
    pub max_age: Duration,
    pub max_entries: usize,
}

impl CachePolicy {
    pub fn new(strategy: CacheStrategy, max_age: Duration, max_entries: usize) -> Self {
        Self {
            strategy,
            max_age,
            max_entries,
        }
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_age).unwrap_or_else(|_| chrono::Duration::days(36_500))
    }
}

impl From<&CachePolicyConfig> for CachePolicy {
    fn from(config: &CachePolicyConfig) -> Self {
        Self::new(
            config.strategy,
            Duration::from_secs(config.max_age_secs),
            config.max_entries,
        )
    }
}

/// Entry counts of one cache, as reported by [`CacheManager::stats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub strategy: CacheStrategy,
    pub entries: usize,
    pub expired: usize,
    pub max_entries: usize,
}

// ============================================================================
// CacheManager
// ============================================================================

/// An entry plus the order in which it was inserted
struct Slot {
    entry: CacheEntry,
    seq: u64,
}

struct NamedCache {
    policy: CachePolicy,
    entries: DashMap<String, Slot>,
    next_seq: AtomicU64,
}

impl NamedCache {
    fn insert(&self, entry: CacheEntry) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(entry.key.clone(), Slot { entry, seq });
    }
}

struct Inner {
    caches: HashMap<String, NamedCache>,
    store: Option<Arc<dyn ICacheStore>>,
}

/// Collection of named caches
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    /// Creates a manager with the given named caches and no persistence
    pub fn new<I, S>(policies: I) -> Self
    where
        I: IntoIterator<Item = (S, CachePolicy)>,
        S: Into<String>,
    {
        Self::build(policies, None)
    }

    /// Creates a manager that mirrors entries into `store`
    pub fn persistent<I, S>(policies: I, store: Arc<dyn ICacheStore>) -> Self
    where
        I: IntoIterator<Item = (S, CachePolicy)>,
        S: Into<String>,
    {
        Self::build(policies, Some(store))
    }

    /// Creates a manager from the `cache` configuration section
    ///
    /// `store` is only used when `persistent` is enabled.
    pub fn from_config(config: &CacheConfig, store: Option<Arc<dyn ICacheStore>>) -> Self {
        let policies = config
            .policies
            .iter()
            .map(|(name, policy)| (name.clone(), CachePolicy::from(policy)));
        let store = if config.persistent { store } else { None };
        Self::build(policies, store)
    }

    fn build<I, S>(policies: I, store: Option<Arc<dyn ICacheStore>>) -> Self
    where
        I: IntoIterator<Item = (S, CachePolicy)>,
        S: Into<String>,
    {
        let caches = policies
            .into_iter()
            .map(|(name, policy)| {
                (
                    name.into(),
                    NamedCache {
                        policy,
                        entries: DashMap::new(),
                        next_seq: AtomicU64::new(0),
                    },
                )
            })
            .collect();
        Self {
            inner: Arc::new(Inner { caches, store }),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.inner.store.is_some()
    }

    fn cache(&self, name: &str) -> Result<&NamedCache, CacheError> {
        self.inner
            .caches
            .get(name)
            .ok_or_else(|| CacheError::UnknownCache(name.to_string()))
    }

    /// Policy of a named cache
    pub fn policy(&self, cache: &str) -> Result<CachePolicy, CacheError> {
        Ok(self.cache(cache)?.policy)
    }

    /// Names of the configured caches, sorted
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.caches.keys().cloned().collect();
        names.sort();
        names
    }

    // ========================================================================
    // Basic operations
    // ========================================================================

    /// Stores a value, then enforces the cache's expiry and size bounds
    pub async fn set(&self, cache: &str, key: &str, data: Value) -> Result<(), CacheError> {
        self.set_at(cache, key, data, Utc::now()).await
    }

    async fn set_at(
        &self,
        cache: &str,
        key: &str,
        data: Value,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let named = self.cache(cache)?;
        let entry = CacheEntry::new(key, data, named.policy.ttl(), now);

        if let Some(store) = &self.inner.store {
            store.put(cache, &entry).await?;
        }
        named.insert(entry);

        let evicted = evict(named, now);
        if !evicted.is_empty() {
            debug!(cache, evicted = evicted.len(), "Evicted cache entries");
            if let Some(store) = &self.inner.store {
                store.delete(cache, &evicted).await?;
            }
        }
        Ok(())
    }

    /// Returns a fresh value, or `None` if absent or expired
    ///
    /// On an in-memory miss the persistent store is consulted and a fresh
    /// stored entry is loaded back into memory.
    pub async fn get(&self, cache: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Utc::now();
        Ok(self
            .lookup(cache, key)
            .await?
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.data))
    }

    /// Looks up an entry regardless of freshness
    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let named = self.cache(cache)?;
        if let Some(slot) = named.entries.get(key) {
            return Ok(Some(slot.value().entry.clone()));
        }

        let Some(store) = &self.inner.store else {
            return Ok(None);
        };
        let stored = store.get(cache, key).await?;
        if let Some(entry) = &stored {
            if !entry.is_expired(Utc::now()) {
                debug!(cache, key, "Warmed cache entry from store");
                named.insert(entry.clone());
            }
        }
        Ok(stored)
    }

    /// Removes one entry; returns whether it was cached in memory
    pub async fn delete(&self, cache: &str, key: &str) -> Result<bool, CacheError> {
        let named = self.cache(cache)?;
        let removed = named.entries.remove(key).is_some();
        if let Some(store) = &self.inner.store {
            store.delete(cache, &[key.to_string()]).await?;
        }
        Ok(removed)
    }

    /// Removes every entry of a cache
    pub async fn clear(&self, cache: &str) -> Result<(), CacheError> {
        let named = self.cache(cache)?;
        named.entries.clear();
        if let Some(store) = &self.inner.store {
            store.clear(cache).await?;
        }
        info!(cache, "Cleared cache");
        Ok(())
    }

    /// Stores any serializable value
    pub async fn set_as<T: Serialize>(
        &self,
        cache: &str,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        self.set(cache, key, serde_json::to_value(value)?).await
    }

    /// Reads a fresh value and deserializes it
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        cache: &str,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self.get(cache, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Strategies
    // ========================================================================

    /// Resolves `key` with the cache's default strategy
    pub async fn execute_strategy<F, Fut, E>(
        &self,
        cache: &str,
        key: &str,
        fetch: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let strategy = self.policy(cache)?.strategy;
        self.execute_with(cache, key, strategy, fetch).await
    }

    /// Resolves `key` with an explicit strategy
    ///
    /// - cache-first: a fresh cached value, otherwise fetch and store.
    /// - network-first: fetch and store; if the fetch fails, any cached
    ///   value, fresh or not.
    /// - stale-while-revalidate: any cached value right away while a
    ///   background task fetches and stores; with nothing cached, wait for
    ///   the fetch.
    pub async fn execute_with<F, Fut, E>(
        &self,
        cache: &str,
        key: &str,
        strategy: CacheStrategy,
        fetch: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.cache(cache)?;
        match strategy {
            CacheStrategy::CacheFirst => {
                if let Some(value) = self.get(cache, key).await? {
                    return Ok(value);
                }
                self.fetch_and_store(cache, key, fetch).await
            }
            CacheStrategy::NetworkFirst => match fetch().await {
                Ok(value) => {
                    // The fetched value is served even if it cannot be kept
                    if let Err(e) = self.set(cache, key, value.clone()).await {
                        warn!(cache, key, error = %e, "Failed to cache fetched value");
                    }
                    Ok(value)
                }
                Err(e) => match self.lookup(cache, key).await? {
                    Some(entry) => {
                        debug!(cache, key, error = %e, "Fetch failed, serving cached value");
                        Ok(entry.data)
                    }
                    None => Err(CacheError::Fetch(e.to_string())),
                },
            },
            CacheStrategy::StaleWhileRevalidate => match self.lookup(cache, key).await? {
                Some(entry) => {
                    let manager = self.clone();
                    let cache = cache.to_string();
                    let key = key.to_string();
                    tokio::spawn(async move {
                        if let Err(e) = manager.fetch_and_store(&cache, &key, fetch).await {
                            warn!(cache = %cache, key = %key, error = %e, "Background revalidation failed");
                        }
                    });
                    Ok(entry.data)
                }
                None => self.fetch_and_store(cache, key, fetch).await,
            },
        }
    }

    async fn fetch_and_store<F, Fut, E>(
        &self,
        cache: &str,
        key: &str,
        fetch: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        let value = fetch()
            .await
            .map_err(|e| CacheError::Fetch(e.to_string()))?;
        self.set(cache, key, value.clone()).await?;
        Ok(value)
    }

    // ========================================================================
    // Persistence and diagnostics
    // ========================================================================

    /// Loads the fresh persisted entries of every cache into memory
    ///
    /// Returns the number of entries loaded.
    pub async fn restore(&self) -> Result<usize, CacheError> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut loaded = 0;
        for (name, named) in &self.inner.caches {
            for entry in store.load(name).await? {
                if !entry.is_expired(now) {
                    named.insert(entry);
                    loaded += 1;
                }
            }
            let evicted = evict(named, now);
            if !evicted.is_empty() {
                store.delete(name, &evicted).await?;
            }
        }
        info!(loaded, "Restored cache entries");
        Ok(loaded)
    }

    /// Entry counts per cache, sorted by name
    pub fn stats(&self) -> Vec<CacheStats> {
        let now = Utc::now();
        let mut stats: Vec<CacheStats> = self
            .inner
            .caches
            .iter()
            .map(|(name, named)| CacheStats {
                name: name.clone(),
                strategy: named.policy.strategy,
                entries: named.entries.len(),
                expired: named
                    .entries
                    .iter()
                    .filter(|e| e.value().entry.is_expired(now))
                    .count(),
                max_entries: named.policy.max_entries,
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

/// Drops expired entries, then the oldest ones beyond `max_entries`;
/// entries written at the same instant go in insertion order
///
/// Returns the removed keys.
fn evict(named: &NamedCache, now: DateTime<Utc>) -> Vec<String> {
    let mut removed: Vec<String> = named
        .entries
        .iter()
        .filter(|e| e.value().entry.is_expired(now))
        .map(|e| e.key().clone())
        .collect();
    for key in &removed {
        named.entries.remove(key);
    }

    let excess = named.entries.len().saturating_sub(named.policy.max_entries);
    if excess > 0 {
        let mut by_age: Vec<(DateTime<Utc>, u64, String)> = named
            .entries
            .iter()
            .map(|e| (e.value().entry.timestamp, e.value().seq, e.key().clone()))
            .collect();
        by_age.sort();
        for (_, _, key) in by_age.into_iter().take(excess) {
            named.entries.remove(&key);
            removed.push(key);
        }
    }
    removed
}
