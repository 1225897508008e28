//! Tidepool Store - Local persistence
//!
//! SQLite-based storage for:
//! - Mirrored rows of every synchronized table, with their sync markers
//! - The offline request queue
//! - Persistent copies of named cache entries
//!
//! ## Architecture
//!
//! This crate implements the `ILocalStore`, `IRequestStore` and
//! `ICacheStore` ports from `tidepool-core` using SQLite as the storage
//! backend. It is a driven (secondary) adapter in the hexagonal
//! architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteLocalStore`] - `ILocalStore` implementation
//! - [`SqliteRequestStore`] - `IRequestStore` implementation
//! - [`SqliteCacheStore`] - `ICacheStore` implementation
//! - [`StoreError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use tidepool_store::{DatabasePool, SqliteLocalStore};
//!
//! # async fn example() -> Result<(), tidepool_store::StoreError> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/tidepool/tidepool.db")).await?;
//! let store = SqliteLocalStore::new(pool.pool().clone());
//! // Use store as ILocalStore...
//! # Ok(())
//! # }
//! ```

pub mod cache_repository;
pub mod local_repository;
pub mod pool;
pub mod queue_repository;

mod codec;

pub use cache_repository::SqliteCacheStore;
pub use local_repository::SqliteLocalStore;
pub use pool::DatabasePool;
pub use queue_repository::SqliteRequestStore;

use tidepool_core::domain::SyncError;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The table was never registered in the local store
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// A record with the same id already exists in the table
    #[error("Record '{id}' already exists in table '{table}'")]
    DuplicateRecord { table: String, id: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::LocalStore(e.to_string())
    }
}
