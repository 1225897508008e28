//! Shared fixtures for sync integration tests
//!
//! The local side is a real in-memory SQLite store. The remote side is
//! [`FakeRemote`], an in-process backend that keeps tables in memory and
//! can be told to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tidepool_core::domain::{SyncError, SyncableRecord, TableCategory, TableDescriptor};
use tidepool_core::ports::{ILocalStore, IRemoteBackend, WriteBatch};
use tidepool_store::{DatabasePool, SqliteLocalStore};
use tidepool_sync::{SchemaRegistry, SyncOptions, SyncOrchestrator};

/// In-memory backend with scriptable failures
#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<HashMap<String, Vec<SyncableRecord>>>,
    /// Table -> error returned by every upsert
    failing: Mutex<HashMap<String, SyncError>>,
    /// Number of upcoming upserts that fail with a 503
    transient_failures: Mutex<u32>,
    /// Upsert call number (1-based) that fails with a conflict
    fail_on_call: Mutex<Option<usize>>,
    delay: Mutex<Option<Duration>>,
    /// Local write performed inside the next upsert, before it returns
    edit_during_upsert: Mutex<Option<(Arc<SqliteLocalStore>, String, SyncableRecord)>>,
    /// `(table, ids)` of every successful upsert, in call order
    pub upserts: Mutex<Vec<(String, Vec<String>)>>,
    pub upsert_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, table: &str, rows: Vec<SyncableRecord>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }

    pub fn rows(&self, table: &str) -> Vec<SyncableRecord> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_table(&self, table: &str, error: SyncError) {
        self.failing.lock().unwrap().insert(table.to_string(), error);
    }

    pub fn fail_transiently(&self, times: u32) {
        *self.transient_failures.lock().unwrap() = times;
    }

    pub fn fail_on_upsert_call(&self, call: usize) {
        *self.fail_on_call.lock().unwrap() = Some(call);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Makes the next upsert rewrite `record` locally while it is in flight
    pub fn edit_locally_during_upsert(
        &self,
        local: Arc<SqliteLocalStore>,
        table: &str,
        record: SyncableRecord,
    ) {
        *self.edit_during_upsert.lock().unwrap() = Some((local, table.to_string(), record));
    }

    pub fn upserted_tables(&self) -> Vec<String> {
        self.upserts
            .lock()
            .unwrap()
            .iter()
            .map(|(table, _)| table.clone())
            .collect()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl IRemoteBackend for FakeRemote {
    async fn fetch_all(&self, table: &str) -> Result<Vec<SyncableRecord>, SyncError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.rows(table))
    }

    async fn upsert_batch(
        &self,
        table: &str,
        records: &[SyncableRecord],
        _conflict_key: &str,
    ) -> Result<(), SyncError> {
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.pause().await;

        let edit = self.edit_during_upsert.lock().unwrap().take();
        if let Some((local, edit_table, record)) = edit {
            local
                .write(WriteBatch::new().upsert(edit_table, record))
                .await
                .unwrap();
        }

        if let Some(error) = self.failing.lock().unwrap().get(table) {
            return Err(error.clone());
        }
        {
            let mut transient = self.transient_failures.lock().unwrap();
            if *transient > 0 {
                *transient -= 1;
                return Err(SyncError::Backend {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                });
            }
        }
        if *self.fail_on_call.lock().unwrap() == Some(call) {
            return Err(SyncError::Conflict("constraint violation".to_string()));
        }

        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        for record in records {
            match rows.iter_mut().find(|r| r.id() == record.id()) {
                Some(existing) => *existing = record.clone(),
                None => rows.push(record.clone()),
            }
        }
        self.upserts.lock().unwrap().push((
            table.to_string(),
            records.iter().map(|r| r.id().to_string()).collect(),
        ));
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn list_tables(&self) -> Result<Vec<String>, SyncError> {
        let mut names: Vec<String> = self.tables.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn count_rows(&self, table: &str) -> Result<u64, SyncError> {
        Ok(self.rows(table).len() as u64)
    }
}

pub struct Harness {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub local: Arc<SqliteLocalStore>,
    pub remote: Arc<FakeRemote>,
}

/// Options with fast retries so failing tests stay quick
pub fn fast_options() -> SyncOptions {
    SyncOptions {
        retry_delay: Duration::from_millis(1),
        ..SyncOptions::default()
    }
}

pub async fn setup(tables: &[&str], options: SyncOptions) -> Harness {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let local = Arc::new(SqliteLocalStore::new(pool.pool().clone()));
    for table in tables {
        local.register_table(table).await.unwrap();
    }

    let remote = Arc::new(FakeRemote::new());
    let registry = SchemaRegistry::new(
        tables
            .iter()
            .map(|t| TableDescriptor::new(*t, TableCategory::Other).unwrap())
            .collect(),
    );
    let orchestrator = Arc::new(SyncOrchestrator::new(
        local.clone(),
        remote.clone(),
        registry,
        options,
    ));

    Harness {
        orchestrator,
        local,
        remote,
    }
}

pub fn user(id: &str, name: &str) -> SyncableRecord {
    SyncableRecord::new(id)
        .with_field("name", name)
        .with_field("created_at", 1_700_000_000_000i64)
}
