//! Remote backend port (driven/secondary port)
//!
//! This module defines the interface to the REST backend that owns the
//! authoritative copy of every synchronized table.
//!
//! ## Design Notes
//!
//! - Records cross this port in their remote wire representation; callers
//!   run them through the record translator first.
//! - `upsert_batch` must be idempotent: upserting the same batch twice
//!   leaves the remote table in the same state as upserting it once.
//! - `health_check` never fails; any problem is reported as `false`.

use crate::domain::{SyncError, SyncableRecord};

/// Port trait for the remote REST backend
#[async_trait::async_trait]
pub trait IRemoteBackend: Send + Sync {
    /// Fetches every row of a table
    async fn fetch_all(&self, table: &str) -> Result<Vec<SyncableRecord>, SyncError>;

    /// Inserts or merges a batch of records, keyed on `conflict_key`
    ///
    /// # Errors
    /// - [`SyncError::Conflict`] for malformed batches or constraint violations
    /// - [`SyncError::Backend`] for other non-success responses
    /// - [`SyncError::Network`] for transport failures
    async fn upsert_batch(
        &self,
        table: &str,
        records: &[SyncableRecord],
        conflict_key: &str,
    ) -> Result<(), SyncError>;

    /// Whether the backend is reachable and answering
    async fn health_check(&self) -> bool;

    /// Names of the tables the backend exposes
    ///
    /// # Errors
    /// Returns [`SyncError::DiscoveryUnavailable`] if the backend offers no
    /// schema listing.
    async fn list_tables(&self) -> Result<Vec<String>, SyncError>;

    /// Exact number of rows in a remote table
    async fn count_rows(&self, table: &str) -> Result<u64, SyncError>;
}
