//! Local store port (driven/secondary port)
//!
//! This module defines the interface to the embedded database that mirrors
//! the remote tables for offline use.
//!
//! ## Design Notes
//!
//! - Tables are addressed by name; every table holds [`LocalRecord`]s.
//! - Individual operations (`create`, `find`, `query`) are atomic on their own.
//! - Multi-record mutations go through [`ILocalStore::write`], the scoped
//!   transaction primitive: every operation of a [`WriteBatch`] becomes
//!   visible together, or none does.

use chrono::{DateTime, Utc};

use crate::domain::{LocalRecord, SyncError, SyncableRecord};

// ============================================================================
// WriteBatch
// ============================================================================

/// A record id together with the local revision that was read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowVersion {
    pub id: String,
    pub revision: u64,
}

impl RowVersion {
    pub fn new(id: impl Into<String>, revision: u64) -> Self {
        Self {
            id: id.into(),
            revision,
        }
    }
}

impl From<&LocalRecord> for RowVersion {
    fn from(local: &LocalRecord) -> Self {
        Self::new(local.id(), local.revision)
    }
}

/// A single mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Inserts a new local record as pending (not yet pushed)
    Create {
        table: String,
        record: SyncableRecord,
    },
    /// Inserts or replaces a local record and marks it pending
    Upsert {
        table: String,
        record: SyncableRecord,
    },
    /// Inserts or replaces a record with its remote version, marked synced.
    /// A locally pending row with the same id is left untouched.
    ApplyRemote {
        table: String,
        record: SyncableRecord,
        synced_at: DateTime<Utc>,
    },
    /// Marks the given records as pushed. A row whose revision no longer
    /// matches was rewritten since it was read and stays pending.
    MarkSynced {
        table: String,
        versions: Vec<RowVersion>,
        synced_at: DateTime<Utc>,
    },
    /// Removes a record
    Delete { table: String, id: String },
}

/// An ordered group of mutations applied in one scoped transaction
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use tidepool_core::ports::{RowVersion, WriteBatch};
///
/// let batch = WriteBatch::new().mark_synced(
///     "notes",
///     vec![RowVersion::new("n-1", 1), RowVersion::new("n-2", 3)],
///     Utc::now(),
/// );
/// assert_eq!(batch.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, table: impl Into<String>, record: SyncableRecord) -> Self {
        self.ops.push(WriteOp::Create {
            table: table.into(),
            record,
        });
        self
    }

    pub fn upsert(mut self, table: impl Into<String>, record: SyncableRecord) -> Self {
        self.ops.push(WriteOp::Upsert {
            table: table.into(),
            record,
        });
        self
    }

    pub fn apply_remote(
        mut self,
        table: impl Into<String>,
        record: SyncableRecord,
        synced_at: DateTime<Utc>,
    ) -> Self {
        self.ops.push(WriteOp::ApplyRemote {
            table: table.into(),
            record,
            synced_at,
        });
        self
    }

    pub fn mark_synced(
        mut self,
        table: impl Into<String>,
        versions: Vec<RowVersion>,
        synced_at: DateTime<Utc>,
    ) -> Self {
        self.ops.push(WriteOp::MarkSynced {
            table: table.into(),
            versions,
            synced_at,
        });
        self
    }

    pub fn delete(mut self, table: impl Into<String>, id: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete {
            table: table.into(),
            id: id.into(),
        });
        self
    }

    /// Appends an already-built operation
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ============================================================================
// ILocalStore trait
// ============================================================================

/// Port trait for the embedded local database
///
/// ## Implementation Notes
///
/// - `query` and `query_unsynced` return records in insertion order.
/// - `write` must be all-or-nothing: on any failure the whole batch is
///   rolled back and a [`SyncError::LocalStore`] is returned.
/// - Operations on a table that was never registered fail with
///   [`SyncError::LocalStore`].
#[async_trait::async_trait]
pub trait ILocalStore: Send + Sync {
    /// Registers a table so it can hold records (idempotent)
    async fn register_table(&self, table: &str) -> Result<(), SyncError>;

    /// Names of all registered tables, in registration order
    async fn table_names(&self) -> Result<Vec<String>, SyncError>;

    /// All records of a table
    async fn query(&self, table: &str) -> Result<Vec<LocalRecord>, SyncError>;

    /// Records of a table whose current version has not been pushed
    async fn query_unsynced(&self, table: &str) -> Result<Vec<LocalRecord>, SyncError>;

    /// Looks up a single record by id
    async fn find(&self, table: &str, id: &str) -> Result<Option<LocalRecord>, SyncError>;

    /// Inserts a new pending record
    async fn create(&self, table: &str, record: SyncableRecord)
        -> Result<LocalRecord, SyncError>;

    /// Counts the records of a table, optionally only the unsynced ones
    async fn count(&self, table: &str, unsynced_only: bool) -> Result<u64, SyncError>;

    /// Applies a batch of mutations in one scoped transaction
    async fn write(&self, batch: WriteBatch) -> Result<(), SyncError>;
}
