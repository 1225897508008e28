//! Sync status
//!
//! [`SyncStatus`] is the single mutable status record owned by a sync
//! orchestrator. Callers only ever receive clones of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of the sync orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Whether a full sync pass is currently running
    pub is_syncing: bool,
    /// Completion time of the last sync pass
    pub last_sync: Option<DateTime<Utc>>,
    /// Scheduled start of the next automatic pass, if auto-sync is running
    pub next_sync: Option<DateTime<Utc>>,
    /// Number of table-level failures since construction or reset
    pub error_count: u64,
    /// Message of the most recent table-level failure
    pub last_error: Option<String>,
    /// Records pushed successfully during the last pass
    pub records_synced: u64,
    /// Unsynced records found at the start of the last pass
    pub records_total: u64,
    /// Remote rows applied locally during the last pass
    pub records_pulled: u64,
    /// `(table, message)` for every table that failed in the last pass
    pub table_errors: Vec<(String, String)>,
}

impl SyncStatus {
    /// Records a table-level failure
    pub fn record_table_error(&mut self, table: &str, message: impl Into<String>) {
        let message = message.into();
        self.error_count += 1;
        self.last_error = Some(format!("{table}: {message}"));
        self.table_errors.push((table.to_string(), message));
    }

    /// Clears per-pass counters at the start of a new pass
    pub fn begin_pass(&mut self) {
        self.records_synced = 0;
        self.records_total = 0;
        self.records_pulled = 0;
        self.table_errors.clear();
    }

    /// Number of records still pending after the last pass
    pub fn pending(&self) -> u64 {
        self.records_total.saturating_sub(self.records_synced)
    }
}
