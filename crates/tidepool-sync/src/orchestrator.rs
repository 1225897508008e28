//! Sync orchestrator - drives push and pull passes over the registry's tables
//!
//! A pass walks the tables returned by the [`SchemaRegistry`] in order. For
//! each table it pushes every unsynced local record in batches, then, when
//! `pull_remote` is enabled, applies the remote copy of the table locally.
//!
//! ## Failure policy
//!
//! Tables are independent: a failing table is recorded in the status and in
//! the pass report, and the pass continues with the next table. Once the
//! pass has finished, any failure is surfaced as
//! [`SyncError::PartialFailure`].
//!
//! ## Concurrency
//!
//! At most one pass runs at a time. The `is_syncing` flag is claimed with a
//! compare-and-swap and released by a drop guard, so an error or a panic
//! inside a pass never leaves the orchestrator blocked.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use tidepool_core::config::SyncConfig;
use tidepool_core::domain::{RecordTranslator, SyncError, SyncStatus, ID_FIELD};
use tidepool_core::ports::{ILocalStore, IRemoteBackend, RowVersion, WriteBatch};

use crate::registry::SchemaRegistry;
use crate::scheduler::AutoSyncHandle;

// ============================================================================
// Options and results
// ============================================================================

/// Tuning knobs of a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Records per remote upsert call
    pub batch_size: usize,
    /// Retries of a retryable remote call (total attempts = retries + 1)
    pub retry_attempts: u32,
    /// Base delay of the exponential retry backoff
    pub retry_delay: Duration,
    /// Whether remote rows are applied locally after the push
    pub pull_remote: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            retry_attempts: config.retry_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            pull_remote: config.pull_remote,
        }
    }
}

/// What happened to one table during a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableOutcome {
    pub table: String,
    /// Unsynced local records found before the push
    pub attempted: u64,
    /// Records pushed and marked synced
    pub pushed: u64,
    /// Remote rows applied locally
    pub pulled: u64,
    /// Pending local rows left untouched by the pull
    pub skipped: u64,
    /// Error message if the table failed
    pub error: Option<String>,
}

impl TableOutcome {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a complete sync pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Per-table outcomes, in sync order
    pub tables: Vec<TableOutcome>,
}

impl SyncReport {
    /// Names of the tables that failed, in sync order
    pub fn failed_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| !t.is_success())
            .map(|t| t.table.clone())
            .collect()
    }

    pub fn records_pushed(&self) -> u64 {
        self.tables.iter().map(|t| t.pushed).sum()
    }

    pub fn records_pulled(&self) -> u64 {
        self.tables.iter().map(|t| t.pulled).sum()
    }

    pub fn is_success(&self) -> bool {
        self.tables.iter().all(TableOutcome::is_success)
    }
}

/// Outcome of a request to run a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The pass ran and every table succeeded
    Completed(SyncReport),
    /// Another pass was in progress; nothing was done
    AlreadyRunning,
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Orchestrates synchronization between the local store and the backend
pub struct SyncOrchestrator {
    local: Arc<dyn ILocalStore>,
    remote: Arc<dyn IRemoteBackend>,
    registry: SchemaRegistry,
    translator: RecordTranslator,
    options: SyncOptions,
    is_syncing: AtomicBool,
    status: RwLock<SyncStatus>,
    last_report: RwLock<Option<SyncReport>>,
    pub(crate) auto_sync: Mutex<Option<AutoSyncHandle>>,
}

/// Releases the pass flag when a pass ends, however it ends
struct PassGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.update_status(|s| s.is_syncing = false);
        self.orchestrator.is_syncing.store(false, Ordering::Release);
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator with the default translation rules
    pub fn new(
        local: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteBackend>,
        registry: SchemaRegistry,
        options: SyncOptions,
    ) -> Self {
        Self {
            local,
            remote,
            registry,
            translator: RecordTranslator::with_default_rules(),
            options,
            is_syncing: AtomicBool::new(false),
            status: RwLock::new(SyncStatus::default()),
            last_report: RwLock::new(None),
            auto_sync: Mutex::new(None),
        }
    }

    /// Replaces the record translator
    pub fn with_translator(mut self, translator: RecordTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Returns a snapshot of the current status
    pub fn get_sync_status(&self) -> SyncStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Report of the most recent completed pass, if any
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears status and report, keeping `is_syncing` and `next_sync`
    pub fn reset(&self) {
        self.update_status(|s| {
            *s = SyncStatus {
                is_syncing: s.is_syncing,
                next_sync: s.next_sync,
                ..SyncStatus::default()
            };
        });
        *self
            .last_report
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn update_status(&self, f: impl FnOnce(&mut SyncStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    fn try_begin_pass(&self) -> Option<PassGuard<'_>> {
        self.is_syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.update_status(|s| {
            s.is_syncing = true;
            s.begin_pass();
        });
        Some(PassGuard { orchestrator: self })
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Runs a pass over every syncable table
    ///
    /// Returns [`SyncOutcome::AlreadyRunning`] without any I/O if another
    /// pass is in progress.
    ///
    /// # Errors
    /// Returns [`SyncError::PartialFailure`] once the pass is complete if
    /// any table failed. The report is still available via
    /// [`last_report`](Self::last_report).
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> Result<SyncOutcome, SyncError> {
        let Some(guard) = self.try_begin_pass() else {
            debug!("Sync pass already running");
            return Ok(SyncOutcome::AlreadyRunning);
        };
        let tables: Vec<String> = self
            .registry
            .list_syncable_tables()
            .await
            .into_iter()
            .map(|t| t.name().to_string())
            .collect();
        self.run_pass(guard, &tables).await
    }

    /// Runs a pass over the given tables only, in the given order
    #[instrument(skip(self))]
    pub async fn sync_selected(&self, tables: &[String]) -> Result<SyncOutcome, SyncError> {
        let Some(guard) = self.try_begin_pass() else {
            debug!("Sync pass already running");
            return Ok(SyncOutcome::AlreadyRunning);
        };
        self.run_pass(guard, tables).await
    }

    async fn run_pass(
        &self,
        _guard: PassGuard<'_>,
        tables: &[String],
    ) -> Result<SyncOutcome, SyncError> {
        let started_at = Utc::now();
        let start = Instant::now();
        info!(tables = tables.len(), "Starting sync pass");

        let mut outcomes = Vec::with_capacity(tables.len());
        for table in tables {
            let mut outcome = TableOutcome::new(table);
            if let Err(e) = self.sync_one(&mut outcome).await {
                error!(table = %table, error = %e, "Table sync failed");
                let message = e.to_string();
                self.update_status(|s| s.record_table_error(table, message.clone()));
                outcome.error = Some(message);
            }
            outcomes.push(outcome);
        }

        let finished_at = Utc::now();
        self.update_status(|s| s.last_sync = Some(finished_at));

        let report = SyncReport {
            started_at,
            finished_at,
            duration_ms: start.elapsed().as_millis() as u64,
            tables: outcomes,
        };
        let failed_tables = report.failed_tables();
        info!(
            pushed = report.records_pushed(),
            pulled = report.records_pulled(),
            failed = failed_tables.len(),
            duration_ms = report.duration_ms,
            "Sync pass finished"
        );
        *self
            .last_report
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());

        if failed_tables.is_empty() {
            Ok(SyncOutcome::Completed(report))
        } else {
            Err(SyncError::PartialFailure { failed_tables })
        }
    }

    async fn sync_one(&self, outcome: &mut TableOutcome) -> Result<(), SyncError> {
        let table = outcome.table.clone();
        self.local.register_table(&table).await?;
        self.push_table(&table, outcome).await?;
        if self.options.pull_remote {
            self.pull_into(&table, outcome).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Push
    // ========================================================================

    /// Pushes every unsynced record of one table
    ///
    /// Records go out in batches of `batch_size`. After each successful
    /// upsert, the batch is marked synced in one local transaction. A batch
    /// failure stops the table; earlier batches stay committed.
    ///
    /// Returns the number of records pushed.
    #[instrument(skip(self))]
    pub async fn sync_table(&self, table: &str) -> Result<u64, SyncError> {
        let mut outcome = TableOutcome::new(table);
        self.push_table(table, &mut outcome).await?;
        Ok(outcome.pushed)
    }

    async fn push_table(&self, table: &str, outcome: &mut TableOutcome) -> Result<(), SyncError> {
        let unsynced = self.local.query_unsynced(table).await?;
        outcome.attempted = unsynced.len() as u64;
        self.update_status(|s| s.records_total += unsynced.len() as u64);

        if unsynced.is_empty() {
            debug!(table, "Nothing to push");
            return Ok(());
        }

        for (index, chunk) in unsynced.chunks(self.options.batch_size).enumerate() {
            let batch: Vec<_> = chunk
                .iter()
                .map(|r| self.translator.to_remote(&r.record))
                .collect();

            self.with_retry("upsert_batch", table, || {
                self.remote.upsert_batch(table, &batch, ID_FIELD)
            })
            .await?;

            let versions: Vec<RowVersion> = chunk.iter().map(RowVersion::from).collect();
            let count = versions.len() as u64;
            self.local
                .write(WriteBatch::new().mark_synced(table, versions, Utc::now()))
                .await?;

            outcome.pushed += count;
            self.update_status(|s| s.records_synced += count);
            debug!(table, batch = index, records = count, "Pushed batch");
        }

        info!(table, pushed = outcome.pushed, "Pushed local changes");
        Ok(())
    }

    // ========================================================================
    // Pull
    // ========================================================================

    /// Applies the remote copy of one table locally
    ///
    /// Remote rows replace synced local rows and are inserted when new.
    /// Locally pending rows are left untouched until they have been pushed.
    ///
    /// Returns the number of rows applied.
    #[instrument(skip(self))]
    pub async fn pull_table(&self, table: &str) -> Result<u64, SyncError> {
        let mut outcome = TableOutcome::new(table);
        self.pull_into(table, &mut outcome).await?;
        Ok(outcome.pulled)
    }

    async fn pull_into(&self, table: &str, outcome: &mut TableOutcome) -> Result<(), SyncError> {
        let rows = self
            .with_retry("fetch_all", table, || self.remote.fetch_all(table))
            .await?;

        let pending: HashSet<String> = self
            .local
            .query_unsynced(table)
            .await?
            .into_iter()
            .map(|r| r.id().to_string())
            .collect();

        let now = Utc::now();
        let mut batch = WriteBatch::new();
        let mut skipped = 0u64;
        for row in &rows {
            if pending.contains(row.id()) {
                skipped += 1;
                continue;
            }
            batch = batch.apply_remote(table, self.translator.to_local(row), now);
        }
        let applied = batch.len() as u64;
        self.local.write(batch).await?;

        outcome.pulled = applied;
        outcome.skipped = skipped;
        self.update_status(|s| s.records_pulled += applied);
        if skipped > 0 {
            debug!(table, skipped, "Kept pending local rows over remote versions");
        }
        info!(table, pulled = applied, "Applied remote rows");
        Ok(())
    }

    /// Registers every syncable table in the local store
    pub async fn register_tables(&self) -> Result<Vec<String>, SyncError> {
        let mut names = Vec::new();
        for table in self.registry.list_syncable_tables().await {
            self.local.register_table(table.name()).await?;
            names.push(table.name().to_string());
        }
        debug!(count = names.len(), "Registered local tables");
        Ok(names)
    }

    // ========================================================================
    // Retry
    // ========================================================================

    /// Runs an idempotent remote call, retrying retryable failures with
    /// exponential backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, table: &str, f: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let max_retries = self.options.retry_attempts;
        let mut last_error: Option<SyncError> = None;

        for attempt in 0..=max_retries {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, table, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt < max_retries && err.is_retryable() {
                        let delay = self
                            .options
                            .retry_delay
                            .saturating_mul(2u32.saturating_pow(attempt));
                        warn!(
                            operation,
                            table,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retryable error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        last_error = Some(err);
                    } else {
                        return Err(err);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SyncError::Network(format!("Retries exhausted for {operation}"))
        }))
    }
}
