//! SQLite implementation of ILocalStore
//!
//! All synchronized tables share one `records` table keyed on
//! `(table_name, id)`. Each row keeps the full record as a JSON object plus
//! its sync markers. Insertion order is the `seq` column; upserts keep the
//! original position of a row.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use tidepool_core::domain::{LocalRecord, SyncError, SyncableRecord};
use tidepool_core::ports::{ILocalStore, WriteBatch, WriteOp};

use crate::codec::{format_datetime, parse_optional_datetime};
use crate::StoreError;

/// SQLite-based implementation of the local store port
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    /// Creates a new store instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn record_to_json(record: &SyncableRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|e| {
        StoreError::SerializationError(format!(
            "Failed to serialize record '{}': {}",
            record.id(),
            e
        ))
    })
}

fn local_record_from_row(row: &SqliteRow) -> Result<LocalRecord, StoreError> {
    let data: String = row.get("data");
    let revision: i64 = row.get("revision");
    let synced: bool = row.get("synced");
    let synced_at: Option<String> = row.get("synced_at");

    let value: serde_json::Value = serde_json::from_str(&data)
        .map_err(|e| StoreError::SerializationError(format!("Corrupt record data: {}", e)))?;
    let record = SyncableRecord::from_value(value)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;

    Ok(LocalRecord {
        record,
        revision: revision as u64,
        synced,
        synced_at: parse_optional_datetime(synced_at)?,
    })
}

// ============================================================================
// Statements shared by single operations and batches
// ============================================================================

async fn ensure_table(conn: &mut SqliteConnection, table: &str) -> Result<(), StoreError> {
    let exists: Option<String> = sqlx::query_scalar("SELECT name FROM local_tables WHERE name = ?")
        .bind(table)
        .fetch_optional(&mut *conn)
        .await?;
    match exists {
        Some(_) => Ok(()),
        None => Err(StoreError::UnknownTable(table.to_string())),
    }
}

async fn insert_pending(
    conn: &mut SqliteConnection,
    table: &str,
    record: &SyncableRecord,
    now: &str,
) -> Result<(), StoreError> {
    let data = record_to_json(record)?;
    let result = sqlx::query(
        "INSERT INTO records (table_name, id, data, synced, synced_at, updated_at) \
         VALUES (?, ?, ?, 0, NULL, ?)",
    )
    .bind(table)
    .bind(record.id())
    .bind(&data)
    .bind(now)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::DuplicateRecord {
                table: table.to_string(),
                id: record.id().to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

async fn apply_op(conn: &mut SqliteConnection, op: &WriteOp, now: &str) -> Result<(), StoreError> {
    match op {
        WriteOp::Create { table, record } => {
            ensure_table(conn, table).await?;
            insert_pending(conn, table, record, now).await?;
        }
        WriteOp::Upsert { table, record } => {
            ensure_table(conn, table).await?;
            let data = record_to_json(record)?;
            sqlx::query(
                "INSERT INTO records (table_name, id, data, synced, synced_at, updated_at) \
                 VALUES (?, ?, ?, 0, NULL, ?) \
                 ON CONFLICT (table_name, id) DO UPDATE SET \
                 data = excluded.data, revision = records.revision + 1, synced = 0, \
                 updated_at = excluded.updated_at",
            )
            .bind(table)
            .bind(record.id())
            .bind(&data)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        WriteOp::ApplyRemote {
            table,
            record,
            synced_at,
        } => {
            ensure_table(conn, table).await?;
            let data = record_to_json(record)?;
            let synced_at = format_datetime(synced_at);
            // Pending local rows win until they are pushed
            sqlx::query(
                "INSERT INTO records (table_name, id, data, synced, synced_at, updated_at) \
                 VALUES (?, ?, ?, 1, ?, ?) \
                 ON CONFLICT (table_name, id) DO UPDATE SET \
                 data = excluded.data, revision = records.revision + 1, synced = 1, \
                 synced_at = excluded.synced_at, \
                 updated_at = excluded.updated_at \
                 WHERE records.synced = 1",
            )
            .bind(table)
            .bind(record.id())
            .bind(&data)
            .bind(&synced_at)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        WriteOp::MarkSynced {
            table,
            versions,
            synced_at,
        } => {
            ensure_table(conn, table).await?;
            let synced_at = format_datetime(synced_at);
            for version in versions {
                // A row rewritten after it was read for upload stays pending
                let result = sqlx::query(
                    "UPDATE records SET synced = 1, synced_at = ? \
                     WHERE table_name = ? AND id = ? AND revision = ?",
                )
                .bind(&synced_at)
                .bind(table)
                .bind(&version.id)
                .bind(version.revision as i64)
                .execute(&mut *conn)
                .await?;
                if result.rows_affected() == 0 {
                    debug!(
                        table = %table,
                        id = %version.id,
                        revision = version.revision,
                        "Row changed during upload, left pending"
                    );
                }
            }
        }
        WriteOp::Delete { table, id } => {
            ensure_table(conn, table).await?;
            sqlx::query("DELETE FROM records WHERE table_name = ? AND id = ?")
                .bind(table)
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

impl SqliteLocalStore {
    async fn query_records(
        &self,
        table: &str,
        unsynced_only: bool,
    ) -> Result<Vec<LocalRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        ensure_table(&mut *conn, table).await?;

        let sql = if unsynced_only {
            "SELECT data, revision, synced, synced_at FROM records \
             WHERE table_name = ? AND synced = 0 ORDER BY seq ASC"
        } else {
            "SELECT data, revision, synced, synced_at FROM records \
             WHERE table_name = ? ORDER BY seq ASC"
        };
        let rows = sqlx::query(sql).bind(table).fetch_all(&mut *conn).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(local_record_from_row(row)?);
        }
        Ok(records)
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let now = format_datetime(&Utc::now());
        let op_count = batch.len();

        let mut tx = self.pool.begin().await?;
        for op in batch.ops() {
            // Dropping `tx` on error rolls the whole batch back
            apply_op(&mut *tx, op, &now).await?;
        }
        tx.commit().await?;

        tracing::trace!(ops = op_count, "Committed write batch");
        Ok(())
    }
}

// ============================================================================
// ILocalStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalStore for SqliteLocalStore {
    async fn register_table(&self, table: &str) -> Result<(), SyncError> {
        tidepool_core::domain::table::validate_table_name(table)?;
        sqlx::query(
            "INSERT OR IGNORE INTO local_tables (name, position, registered_at) \
             VALUES (?, (SELECT COALESCE(MAX(position), -1) + 1 FROM local_tables), ?)",
        )
        .bind(table)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        tracing::debug!(table, "Registered local table");
        Ok(())
    }

    async fn table_names(&self) -> Result<Vec<String>, SyncError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT name FROM local_tables ORDER BY position ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::from)?;
        Ok(names)
    }

    async fn query(&self, table: &str) -> Result<Vec<LocalRecord>, SyncError> {
        Ok(self.query_records(table, false).await?)
    }

    async fn query_unsynced(&self, table: &str) -> Result<Vec<LocalRecord>, SyncError> {
        Ok(self.query_records(table, true).await?)
    }

    async fn find(&self, table: &str, id: &str) -> Result<Option<LocalRecord>, SyncError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        ensure_table(&mut *conn, table).await?;

        let row = sqlx::query(
            "SELECT data, revision, synced, synced_at FROM records \
             WHERE table_name = ? AND id = ?",
        )
        .bind(table)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(ref r) => Ok(Some(local_record_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        table: &str,
        record: SyncableRecord,
    ) -> Result<LocalRecord, SyncError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        ensure_table(&mut *conn, table).await?;
        insert_pending(&mut *conn, table, &record, &format_datetime(&Utc::now())).await?;

        tracing::trace!(table, id = record.id(), "Created local record");
        Ok(LocalRecord::pending(record))
    }

    async fn count(&self, table: &str, unsynced_only: bool) -> Result<u64, SyncError> {
        let mut conn = self.pool.acquire().await.map_err(StoreError::from)?;
        ensure_table(&mut *conn, table).await?;

        let sql = if unsynced_only {
            "SELECT COUNT(*) FROM records WHERE table_name = ? AND synced = 0"
        } else {
            "SELECT COUNT(*) FROM records WHERE table_name = ?"
        };
        let count: i64 = sqlx::query_scalar(sql)
            .bind(table)
            .fetch_one(&mut *conn)
            .await
            .map_err(StoreError::from)?;
        Ok(count as u64)
    }

    async fn write(&self, batch: WriteBatch) -> Result<(), SyncError> {
        Ok(self.write_batch(batch).await?)
    }
}
