//! Tidepool Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Periodic sync passes between the local database and the backend
//! - Backend health probing, feeding the connectivity signal
//! - Replay of the offline request queue when connectivity returns
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Every background task observes one `CancellationToken`, triggered on
//! receipt of SIGTERM or SIGINT. Auto-sync runs on the orchestrator's own
//! timer and is stopped explicitly on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tidepool_cache::CacheManager;
use tidepool_core::config::Config;
use tidepool_core::ports::IRemoteBackend;
use tidepool_queue::{run_health_probe, ConnectivityMonitor, HttpTransport, OfflineQueue};
use tidepool_remote::{RestBackend, RestClient};
use tidepool_store::{DatabasePool, SqliteCacheStore, SqliteLocalStore, SqliteRequestStore};
use tidepool_sync::{SchemaRegistry, SyncOptions, SyncOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Interval between backend health probes
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_secs(15);

// ============================================================================
// DaemonService
// ============================================================================

/// Owns every long-running component of the daemon
struct DaemonService {
    config: Config,
    db_pool: DatabasePool,
    orchestrator: Arc<SyncOrchestrator>,
    queue: Arc<OfflineQueue>,
    cache: CacheManager,
    remote: Arc<dyn IRemoteBackend>,
    connectivity: ConnectivityMonitor,
    /// Token for signalling graceful shutdown to all async tasks
    shutdown: CancellationToken,
    probe_interval: Duration,
}

impl DaemonService {
    /// Loads configuration and opens the database
    async fn new(shutdown: CancellationToken) -> Result<Self> {
        let config_path = Config::default_path();
        let mut config = Config::load_or_default(&config_path);
        config.apply_env_overrides();
        info!(config_path = %config_path.display(), "Loaded configuration");

        let errors = config.validate();
        if !errors.is_empty() {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            anyhow::bail!("Invalid configuration: {}", messages.join("; "));
        }
        if config.remote.base_url.is_empty() {
            anyhow::bail!(
                "remote.base_url is not set in {}",
                config_path.display()
            );
        }

        let db_pool = DatabasePool::new(&config.storage.database_path)
            .await
            .context("Failed to open database")?;

        Self::with_pool(config, db_pool, shutdown)
    }

    /// Wires every component on top of an open database
    fn with_pool(config: Config, db_pool: DatabasePool, shutdown: CancellationToken) -> Result<Self> {
        let remote: Arc<dyn IRemoteBackend> =
            Arc::new(RestBackend::new(RestClient::new(&config.remote)));
        let local = Arc::new(SqliteLocalStore::new(db_pool.pool().clone()));

        let registry = SchemaRegistry::from_config(&config.sync)
            .context("Invalid table lists in sync configuration")?
            .with_remote(remote.clone());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            local,
            remote.clone(),
            registry,
            SyncOptions::from(&config.sync),
        ));

        // Offline until the first probe answers
        let connectivity = ConnectivityMonitor::new(false);
        let queue = Arc::new(
            OfflineQueue::new(
                Arc::new(SqliteRequestStore::new(db_pool.pool().clone())),
                Arc::new(HttpTransport::new(Duration::from_secs(
                    config.remote.request_timeout_secs,
                ))),
                config.queue.backoff_policy(),
            )
            .with_connectivity(connectivity.clone()),
        );

        let cache = CacheManager::from_config(
            &config.cache,
            Some(Arc::new(SqliteCacheStore::new(db_pool.pool().clone()))),
        );

        Ok(Self {
            config,
            db_pool,
            orchestrator,
            queue,
            cache,
            remote,
            connectivity,
            shutdown,
            probe_interval: HEALTH_PROBE_INTERVAL,
        })
    }

    /// Runs until the shutdown token fires
    async fn run(&self) -> Result<()> {
        if self.cache.is_persistent() {
            match self.cache.restore().await {
                Ok(restored) => info!(restored, "Restored persistent cache"),
                Err(e) => warn!(error = %e, "Failed to restore persistent cache"),
            }
        }

        let probe = tokio::spawn(run_health_probe(
            self.remote.clone(),
            self.connectivity.clone(),
            self.probe_interval,
            self.shutdown.child_token(),
        ));

        let replay_interval = match self.config.queue.process_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let replay = self
            .queue
            .spawn_auto_processing(replay_interval, self.shutdown.child_token());

        let sync_interval = Duration::from_millis(self.config.sync.sync_interval_ms);
        self.orchestrator
            .start_auto_sync(sync_interval)
            .context("Invalid sync interval")?;
        info!(
            sync_interval_ms = self.config.sync.sync_interval_ms,
            queue_interval_secs = self.config.queue.process_interval_secs,
            "Daemon running"
        );

        self.shutdown.cancelled().await;
        info!("Shutdown requested, stopping background tasks");

        self.orchestrator.stop_auto_sync_and_wait().await;
        for (name, handle) in [("health probe", probe), ("queue replay", replay)] {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }

        let status = self.orchestrator.get_sync_status();
        info!(
            last_sync = ?status.last_sync,
            error_count = status.error_count,
            "Background tasks stopped"
        );
        self.db_pool.close().await;
        Ok(())
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let level = Config::load_or_default(&Config::default_path()).logging;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level.level));

    if level.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("Tidepool daemon starting (tidepoold)");

    let shutdown_token = CancellationToken::new();

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(shutdown_token.clone()).await?;

    let result = service.run().await;

    match &result {
        Ok(()) => info!("Tidepool daemon shut down gracefully"),
        Err(e) => error!(error = %e, "Tidepool daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
