//! SQLite pool shared by the local, request and cache stores
//!
//! All three stores live in one database file so that a sync batch, the
//! offline queue and the persistent cache survive restarts together.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::StoreError;

/// Schema applied on every open; every statement is `IF NOT EXISTS`
const SCHEMA: &str = include_str!("migrations/20260301_initial.sql");

const FILE_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the Tidepool database
///
/// Cloning is cheap; clones share the underlying pool.
#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the database at `db_path` in WAL mode and
    /// applies the schema
    ///
    /// # Errors
    ///
    /// `StoreError::ConnectionFailed` if the file or its directory cannot be
    /// opened, `StoreError::MigrationFailed` if the schema cannot be applied.
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                StoreError::ConnectionFailed(format!("cannot open {}: {e}", db_path.display()))
            })?;

        let db = Self { pool };
        db.apply_schema().await?;
        info!(path = %db_path.display(), "Opened Tidepool database");
        Ok(db)
    }

    /// Private in-memory database for tests
    ///
    /// Limited to one connection: each SQLite in-memory connection is its own
    /// database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionFailed(format!("in-memory database: {e}")))?;

        let db = Self { pool };
        db.apply_schema().await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Waits for in-flight queries and closes every connection
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database closed");
    }

    async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        debug!("Schema applied");
        Ok(())
    }
}
