//! SQLite implementation of ICacheStore

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use tidepool_core::domain::{CacheEntry, SyncError};
use tidepool_core::ports::ICacheStore;

use crate::codec::{format_datetime, parse_datetime};
use crate::StoreError;

/// SQLite-based implementation of the cache store port
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CacheEntry, StoreError> {
    let data: String = row.get("data");
    let timestamp: String = row.get("timestamp");
    let expires_at: String = row.get("expires_at");

    Ok(CacheEntry {
        key: row.get("key"),
        data: serde_json::from_str(&data)
            .map_err(|e| StoreError::SerializationError(format!("Corrupt cache data: {}", e)))?,
        timestamp: parse_datetime(&timestamp)?,
        expires_at: parse_datetime(&expires_at)?,
    })
}

#[async_trait::async_trait]
impl ICacheStore for SqliteCacheStore {
    async fn put(&self, cache: &str, entry: &CacheEntry) -> Result<(), SyncError> {
        let data = serde_json::to_string(&entry.data)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries \
             (cache_name, key, data, timestamp, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(cache)
        .bind(&entry.key)
        .bind(&data)
        .bind(format_datetime(&entry.timestamp))
        .bind(format_datetime(&entry.expires_at))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<CacheEntry>, SyncError> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE cache_name = ? AND key = ?")
            .bind(cache)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        match row {
            Some(ref r) => Ok(Some(entry_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn load(&self, cache: &str) -> Result<Vec<CacheEntry>, SyncError> {
        let rows = sqlx::query(
            "SELECT * FROM cache_entries WHERE cache_name = ? ORDER BY timestamp ASC",
        )
        .bind(cache)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            entries.push(entry_from_row(row)?);
        }
        Ok(entries)
    }

    async fn delete(&self, cache: &str, keys: &[String]) -> Result<(), SyncError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;
        for key in keys {
            sqlx::query("DELETE FROM cache_entries WHERE cache_name = ? AND key = ?")
                .bind(cache)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::from)?;
        }
        tx.commit().await.map_err(StoreError::from)?;
        Ok(())
    }

    async fn clear(&self, cache: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM cache_entries WHERE cache_name = ?")
            .bind(cache)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}
