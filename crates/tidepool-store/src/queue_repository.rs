//! SQLite implementation of IRequestStore
//!
//! Queued requests live in their own `queued_requests` table, separate from
//! the synchronized records. Replay order is ascending `timestamp`, ties
//! broken by insertion order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use tidepool_core::domain::{QueuedRequest, RequestStatus, SyncError};
use tidepool_core::ports::IRequestStore;

use crate::codec::{format_datetime, parse_datetime, parse_optional_datetime};
use crate::StoreError;

/// SQLite-based implementation of the request store port
pub struct SqliteRequestStore {
    pool: SqlitePool,
}

impl SqliteRequestStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn request_from_row(row: &SqliteRow) -> Result<QueuedRequest, StoreError> {
    let headers_str: String = row.get("headers");
    let status_str: String = row.get("status");
    let timestamp_str: String = row.get("timestamp");
    let next_retry_str: String = row.get("next_retry_at");
    let attempts: i64 = row.get("attempts");

    let headers: BTreeMap<String, String> = serde_json::from_str(&headers_str)
        .map_err(|e| StoreError::SerializationError(format!("Corrupt headers: {}", e)))?;
    let status: RequestStatus = status_str
        .parse()
        .map_err(|e: tidepool_core::domain::DomainError| {
            StoreError::SerializationError(e.to_string())
        })?;

    Ok(QueuedRequest {
        id: row.get("id"),
        url: row.get("url"),
        method: row.get("method"),
        headers,
        body: row.get("body"),
        timestamp: parse_datetime(&timestamp_str)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        next_retry_at: parse_datetime(&next_retry_str)?,
        status,
    })
}

fn headers_to_json(request: &QueuedRequest) -> Result<String, StoreError> {
    serde_json::to_string(&request.headers).map_err(|e| {
        StoreError::SerializationError(format!("Failed to serialize headers: {}", e))
    })
}

#[async_trait::async_trait]
impl IRequestStore for SqliteRequestStore {
    async fn insert(&self, request: &QueuedRequest) -> Result<(), SyncError> {
        let headers = headers_to_json(request)?;
        sqlx::query(
            "INSERT INTO queued_requests \
             (id, url, method, headers, body, timestamp, attempts, next_retry_at, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id)
        .bind(&request.url)
        .bind(&request.method)
        .bind(&headers)
        .bind(&request.body)
        .bind(format_datetime(&request.timestamp))
        .bind(i64::from(request.attempts))
        .bind(format_datetime(&request.next_retry_at))
        .bind(request.status.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        tracing::trace!(request_id = %request.id, "Stored queued request");
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<QueuedRequest>, SyncError> {
        let rows = sqlx::query(
            "SELECT * FROM queued_requests WHERE status = 'pending' \
             ORDER BY timestamp ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            requests.push(request_from_row(row)?);
        }
        Ok(requests)
    }

    async fn update(&self, request: &QueuedRequest) -> Result<(), SyncError> {
        let headers = headers_to_json(request)?;
        sqlx::query(
            "UPDATE queued_requests SET url = ?, method = ?, headers = ?, body = ?, \
             attempts = ?, next_retry_at = ?, status = ? WHERE id = ?",
        )
        .bind(&request.url)
        .bind(&request.method)
        .bind(&headers)
        .bind(&request.body)
        .bind(i64::from(request.attempts))
        .bind(format_datetime(&request.next_retry_at))
        .bind(request.status.to_string())
        .bind(&request.id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM queued_requests WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_pending(&self) -> Result<u64, SyncError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM queued_requests WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::from)?;
        Ok(count as u64)
    }

    async fn oldest_timestamp(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let oldest: Option<String> = sqlx::query_scalar(
            "SELECT MIN(timestamp) FROM queued_requests WHERE status = 'pending'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;
        Ok(parse_optional_datetime(oldest)?)
    }

    async fn clear(&self) -> Result<u64, SyncError> {
        let result = sqlx::query("DELETE FROM queued_requests")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;

        tracing::debug!(removed = result.rows_affected(), "Cleared request queue");
        Ok(result.rows_affected())
    }
}
