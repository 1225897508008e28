//! Schema registry
//!
//! The [`SchemaRegistry`] decides which tables take part in synchronization
//! and in which order. It works in one of two modes:
//!
//! - **Static**: the built-in list of known application tables.
//! - **Dynamic**: the table names published by the backend's OpenAPI root.
//!   If the backend cannot be asked, the registry falls back to the static
//!   list and logs the `DiscoveryUnavailable` condition.
//!
//! In both modes system and migration tables are excluded, and an inclusion
//! set, when configured, restricts the result to exactly those tables.
//!
//! Sync order is registry order. The registry does not know about foreign
//! keys, so a pass may push a child row before its parent's table.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use tidepool_core::config::{DiscoveryMode, SyncConfig};
use tidepool_core::domain::table::validate_table_name;
use tidepool_core::domain::{SyncError, TableCategory, TableDescriptor};
use tidepool_core::ports::{ILocalStore, IRemoteBackend};

/// Known application tables, in sync order
pub const KNOWN_TABLES: &[(&str, TableCategory)] = &[
    ("profiles", TableCategory::Profile),
    ("user_preferences", TableCategory::Profile),
    ("personality_results", TableCategory::Profile),
    ("content_items", TableCategory::Content),
    ("daily_insights", TableCategory::Content),
    ("content_progress", TableCategory::Content),
    ("goals", TableCategory::Coaching),
    ("action_items", TableCategory::Coaching),
    ("journal_entries", TableCategory::Coaching),
    ("coaching_sessions", TableCategory::Coaching),
    ("subscriptions", TableCategory::Billing),
    ("payment_history", TableCategory::Billing),
    ("notifications", TableCategory::System),
    ("app_feedback", TableCategory::System),
];

/// Table names never synced, whatever the configuration says
pub const SYSTEM_TABLES: &[&str] = &["schema_migrations", "_prisma_migrations"];

/// Name prefixes of backend-internal tables
pub const SYSTEM_PREFIXES: &[&str] = &["pg_", "_"];

/// Diagnostics for one table, as shown by `tidepool tables`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub name: String,
    pub category: TableCategory,
    pub included: bool,
    /// Rows in the local store; `None` if the table is not registered locally
    pub local_rows: Option<u64>,
    /// Local rows not yet pushed
    pub pending_rows: Option<u64>,
    /// Rows on the backend; `None` if it could not be counted
    pub remote_rows: Option<u64>,
}

/// Decides which tables are synchronized
pub struct SchemaRegistry {
    known: Vec<TableDescriptor>,
    mode: DiscoveryMode,
    remote: Option<Arc<dyn IRemoteBackend>>,
    /// Configured inclusion set, in configuration order
    include: Vec<String>,
    exclude: HashSet<String>,
}

impl SchemaRegistry {
    /// Creates a static-mode registry over the given table list
    pub fn new(known: Vec<TableDescriptor>) -> Self {
        Self {
            known,
            mode: DiscoveryMode::Static,
            remote: None,
            include: Vec::new(),
            exclude: HashSet::new(),
        }
    }

    /// Creates a static-mode registry over [`KNOWN_TABLES`]
    pub fn with_known_tables() -> Self {
        let known = KNOWN_TABLES
            .iter()
            .filter_map(|(name, category)| TableDescriptor::new(*name, *category).ok())
            .collect();
        Self::new(known)
    }

    /// Creates a registry over [`KNOWN_TABLES`] configured from the `sync`
    /// section
    ///
    /// Dynamic mode additionally needs [`with_remote`](Self::with_remote).
    ///
    /// # Errors
    /// Returns an error if an include or exclude entry is not a valid table
    /// name.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        for name in config.include_tables.iter().chain(&config.exclude_tables) {
            validate_table_name(name)?;
        }
        let mut registry = Self::with_known_tables()
            .with_include(config.include_tables.clone())
            .with_exclude(config.exclude_tables.clone());
        registry.mode = config.discovery;
        Ok(registry)
    }

    /// Attaches the backend used for dynamic discovery and reports
    pub fn with_remote(mut self, remote: Arc<dyn IRemoteBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Switches to dynamic discovery
    pub fn dynamic(mut self) -> Self {
        self.mode = DiscoveryMode::Dynamic;
        self
    }

    /// Restricts syncing to exactly these tables (empty means no restriction)
    pub fn with_include(mut self, tables: Vec<String>) -> Self {
        self.include = tables;
        self
    }

    /// Adds table names that are never synced
    pub fn with_exclude(mut self, tables: Vec<String>) -> Self {
        self.exclude.extend(tables);
        self
    }

    pub fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    /// Whether a table name is excluded by the system rules or configuration
    pub fn is_excluded(&self, name: &str) -> bool {
        SYSTEM_TABLES.contains(&name)
            || SYSTEM_PREFIXES.iter().any(|p| name.starts_with(p))
            || self.exclude.contains(name)
    }

    fn category_of(&self, name: &str) -> TableCategory {
        self.known
            .iter()
            .find(|t| t.name() == name)
            .map(TableDescriptor::category)
            .unwrap_or(TableCategory::Other)
    }

    /// Marks every candidate included or excluded, in candidate order,
    /// then appends included names missing from the candidates
    fn apply_filters(&self, candidates: Vec<TableDescriptor>) -> Vec<TableDescriptor> {
        let include: BTreeSet<&str> = self.include.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(candidates.len());

        for table in candidates {
            if !seen.insert(table.name().to_string()) {
                continue;
            }
            let wanted = include.is_empty() || include.contains(table.name());
            if self.is_excluded(table.name()) || !wanted {
                out.push(table.exclude());
            } else {
                out.push(table);
            }
        }

        for name in &self.include {
            if seen.contains(name) || self.is_excluded(name) {
                continue;
            }
            if let Ok(table) = TableDescriptor::new(name.clone(), self.category_of(name)) {
                seen.insert(name.clone());
                out.push(table);
            }
        }
        out
    }

    /// Asks the backend for its tables
    ///
    /// # Errors
    /// Returns [`SyncError::DiscoveryUnavailable`] if no backend is attached
    /// or the backend cannot list its schema.
    pub async fn discover(&self) -> Result<Vec<TableDescriptor>, SyncError> {
        let remote = self.remote.as_ref().ok_or_else(|| {
            SyncError::DiscoveryUnavailable("no remote backend configured".to_string())
        })?;
        let names = remote.list_tables().await.map_err(|e| match e {
            SyncError::DiscoveryUnavailable(_) => e,
            other => SyncError::DiscoveryUnavailable(other.to_string()),
        })?;

        let tables = names
            .into_iter()
            .filter_map(|name| {
                let category = self.category_of(&name);
                match TableDescriptor::new(name, category) {
                    Ok(table) => Some(table),
                    Err(e) => {
                        debug!(error = %e, "Skipping remote table with unusable name");
                        None
                    }
                }
            })
            .collect();
        Ok(tables)
    }

    /// Every candidate table with its inclusion status
    ///
    /// In dynamic mode this falls back to the static list when discovery is
    /// unavailable.
    pub async fn describe_tables(&self) -> Vec<TableDescriptor> {
        let candidates = match self.mode {
            DiscoveryMode::Static => self.known.clone(),
            DiscoveryMode::Dynamic => match self.discover().await {
                Ok(tables) => tables,
                Err(e) => {
                    warn!(error = %e, "Falling back to the static table list");
                    self.known.clone()
                }
            },
        };
        self.apply_filters(candidates)
    }

    /// The tables to synchronize, in sync order
    pub async fn list_syncable_tables(&self) -> Vec<TableDescriptor> {
        self.describe_tables()
            .await
            .into_iter()
            .filter(TableDescriptor::is_included)
            .collect()
    }

    /// Remote tables that the local store does not know about
    ///
    /// Excluded system tables are never reported. The result is for
    /// visibility only; nothing is registered or synced automatically.
    pub async fn detect_new_tables(
        &self,
        local: &dyn ILocalStore,
    ) -> Result<Vec<String>, SyncError> {
        let remote_tables = self.discover().await?;
        let local_tables: HashSet<String> = local.table_names().await?.into_iter().collect();

        let new_tables: Vec<String> = remote_tables
            .into_iter()
            .map(|t| t.name().to_string())
            .filter(|name| !local_tables.contains(name) && !self.is_excluded(name))
            .collect();

        if !new_tables.is_empty() {
            debug!(count = new_tables.len(), "Remote tables missing locally");
        }
        Ok(new_tables)
    }

    /// Per-table diagnostics for every candidate table
    pub async fn table_report(&self, local: &dyn ILocalStore) -> Vec<TableReport> {
        let mut reports = Vec::new();
        for table in self.describe_tables().await {
            let name = table.name();
            let local_rows = local.count(name, false).await.ok();
            let pending_rows = local.count(name, true).await.ok();
            let remote_rows = match &self.remote {
                Some(remote) => remote.count_rows(name).await.ok(),
                None => None,
            };
            reports.push(TableReport {
                name: name.to_string(),
                category: table.category(),
                included: table.is_included(),
                local_rows,
                pending_rows,
                remote_rows,
            });
        }
        reports
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_known_tables()
    }
}
