//! Wiring shared by the commands
//!
//! Loads the configuration once and builds adapters on demand, so a command
//! only opens what it needs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use tidepool_cache::CacheManager;
use tidepool_core::config::Config;
use tidepool_core::ports::{ICacheStore, IRemoteBackend};
use tidepool_queue::{HttpTransport, OfflineQueue};
use tidepool_remote::{RestBackend, RestClient};
use tidepool_store::{DatabasePool, SqliteCacheStore, SqliteLocalStore, SqliteRequestStore};
use tidepool_sync::{SchemaRegistry, SyncOptions, SyncOrchestrator};

pub struct App {
    pub config_path: PathBuf,
    pub config: Config,
}

impl App {
    /// Loads the configuration from `path` (or the default location) and
    /// applies environment overrides
    pub fn load(path: Option<PathBuf>) -> Self {
        let config_path = path.unwrap_or_else(Config::default_path);
        let mut config = Config::load_or_default(&config_path);
        config.apply_env_overrides();
        Self {
            config_path,
            config,
        }
    }

    /// Opens (and migrates) the database
    pub async fn open_database(&self) -> Result<DatabasePool> {
        let db_path = &self.config.storage.database_path;
        let pool = DatabasePool::new(db_path)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        info!(path = %db_path.display(), "Opened database");
        Ok(pool)
    }

    /// REST backend built from the `remote` section
    pub fn remote(&self) -> Result<Arc<RestBackend>> {
        if self.config.remote.base_url.is_empty() {
            anyhow::bail!(
                "No backend configured. Set remote.base_url in {} or TIDEPOOL_REMOTE_URL.",
                self.config_path.display()
            );
        }
        Ok(Arc::new(RestBackend::new(RestClient::new(
            &self.config.remote,
        ))))
    }

    pub fn registry(&self, remote: Arc<dyn IRemoteBackend>) -> Result<SchemaRegistry> {
        let registry = SchemaRegistry::from_config(&self.config.sync)
            .context("Invalid table lists in sync configuration")?;
        Ok(registry.with_remote(remote))
    }

    pub fn orchestrator(
        &self,
        pool: &DatabasePool,
        remote: Arc<dyn IRemoteBackend>,
    ) -> Result<SyncOrchestrator> {
        let local = Arc::new(SqliteLocalStore::new(pool.pool().clone()));
        let registry = self.registry(remote.clone())?;
        Ok(SyncOrchestrator::new(
            local,
            remote,
            registry,
            SyncOptions::from(&self.config.sync),
        ))
    }

    pub fn queue(&self, pool: &DatabasePool) -> OfflineQueue {
        let store = Arc::new(SqliteRequestStore::new(pool.pool().clone()));
        let transport = Arc::new(HttpTransport::new(std::time::Duration::from_secs(
            self.config.remote.request_timeout_secs,
        )));
        OfflineQueue::new(store, transport, self.config.queue.backoff_policy())
    }

    pub fn cache(&self, pool: &DatabasePool) -> CacheManager {
        let store: Arc<dyn ICacheStore> = Arc::new(SqliteCacheStore::new(pool.pool().clone()));
        CacheManager::from_config(&self.config.cache, Some(store))
    }
}
