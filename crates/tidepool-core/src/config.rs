//! Configuration module for Tidepool.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, environment overrides, and a builder
//! pattern for programmatic use.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{BackoffPolicy, CacheStrategy};

/// Environment variable overriding `remote.base_url`.
pub const ENV_REMOTE_URL: &str = "TIDEPOOL_REMOTE_URL";
/// Environment variable overriding `remote.api_key`.
pub const ENV_API_KEY: &str = "TIDEPOOL_API_KEY";

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Tidepool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub queue: QueueConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

/// REST backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the backend, e.g. `https://project.example.co`.
    pub base_url: String,
    /// API key sent as the `apikey` header and bearer token.
    pub api_key: String,
    /// Timeout applied to every regular request, in seconds.
    pub request_timeout_secs: u64,
    /// Timeout for health probes, in seconds.
    pub health_timeout_secs: u64,
    /// Table queried by health probes.
    pub probe_table: String,
    /// How many times a throttled (429) request is retried.
    pub max_rate_limit_retries: u32,
}

/// How the schema registry finds the tables to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Use the built-in list of known tables.
    Static,
    /// Ask the backend, falling back to the built-in list on failure.
    Dynamic,
}

/// Table synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Records per upsert call.
    pub batch_size: usize,
    /// Retries of a retryable remote call before giving up; 0 tries once.
    pub retry_attempts: u32,
    /// Base delay between retries, in milliseconds.
    pub retry_delay_ms: u64,
    /// Interval between automatic sync passes, in milliseconds.
    pub sync_interval_ms: u64,
    /// Whether each table is pulled after it is pushed.
    pub pull_remote: bool,
    pub discovery: DiscoveryMode,
    /// When non-empty, only these tables are synced.
    pub include_tables: Vec<String>,
    /// Extra table names never synced, on top of the system tables.
    pub exclude_tables: Vec<String>,
}

/// Offline request queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Seconds between periodic queue processing runs; 0 disables the
    /// timer and leaves only reconnect-triggered runs.
    pub process_interval_secs: u64,
}

/// Policy for one named cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicyConfig {
    pub strategy: CacheStrategy,
    /// Lifetime of an entry, in seconds.
    pub max_age_secs: u64,
    pub max_entries: usize,
}

/// Named cache policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether entries are mirrored into the database.
    pub persistent: bool,
    pub policies: BTreeMap<String, CachePolicyConfig>,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json: bool,
}

/// Local database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/tidepool/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tidepool")
            .join("config.yaml")
    }

    /// Apply `TIDEPOOL_REMOTE_URL` / `TIDEPOOL_API_KEY` from the process
    /// environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup. Empty values are
    /// ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_REMOTE_URL).filter(|v| !v.is_empty()) {
            self.remote.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.remote.api_key = key;
        }
    }

    /// Serialize to YAML, as written by `tidepool config init`.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl QueueConfig {
    /// Backoff parameters for queue replay.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_ms: self.backoff_base_ms,
            cap_ms: self.backoff_cap_ms,
            max_attempts: self.max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            request_timeout_secs: 30,
            health_timeout_secs: 5,
            probe_table: "profiles".to_string(),
            max_rate_limit_retries: 3,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            sync_interval_ms: 300_000,
            pull_remote: true,
            discovery: DiscoveryMode::Static,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            backoff_base_ms: policy.base_ms,
            backoff_cap_ms: policy.cap_ms,
            process_interval_secs: 30,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(
            "api".to_string(),
            CachePolicyConfig {
                strategy: CacheStrategy::NetworkFirst,
                max_age_secs: 5 * 60,
                max_entries: 100,
            },
        );
        policies.insert(
            "content".to_string(),
            CachePolicyConfig {
                strategy: CacheStrategy::CacheFirst,
                max_age_secs: 60 * 60,
                max_entries: 200,
            },
        );
        policies.insert(
            "user".to_string(),
            CachePolicyConfig {
                strategy: CacheStrategy::StaleWhileRevalidate,
                max_age_secs: 10 * 60,
                max_entries: 50,
            },
        );
        Self {
            persistent: true,
            policies,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("~/.local/share"))
                .join("tidepool")
                .join("tidepool.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.batch_size"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn must_be_positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError {
            field: field.into(),
            message: "must be greater than 0".into(),
        });
    }
}

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid. An empty
    /// `remote.base_url` is accepted here (the CLI reports it when a command
    /// actually needs the backend); a non-empty one must be an http(s) URL.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- remote ---
        let url = self.remote.base_url.trim();
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "remote.base_url".into(),
                message: format!("must start with http:// or https://, got '{url}'"),
            });
        }
        must_be_positive(
            &mut errors,
            "remote.request_timeout_secs",
            self.remote.request_timeout_secs,
        );
        must_be_positive(
            &mut errors,
            "remote.health_timeout_secs",
            self.remote.health_timeout_secs,
        );
        if crate::domain::table::validate_table_name(&self.remote.probe_table).is_err() {
            errors.push(ValidationError {
                field: "remote.probe_table".into(),
                message: format!("invalid table name '{}'", self.remote.probe_table),
            });
        }

        // --- sync ---
        must_be_positive(&mut errors, "sync.batch_size", self.sync.batch_size as u64);
        must_be_positive(
            &mut errors,
            "sync.sync_interval_ms",
            self.sync.sync_interval_ms,
        );
        for (field, names) in [
            ("sync.include_tables", &self.sync.include_tables),
            ("sync.exclude_tables", &self.sync.exclude_tables),
        ] {
            for name in names {
                if crate::domain::table::validate_table_name(name).is_err() {
                    errors.push(ValidationError {
                        field: field.into(),
                        message: format!("invalid table name '{name}'"),
                    });
                }
            }
        }

        // --- queue ---
        must_be_positive(
            &mut errors,
            "queue.max_attempts",
            u64::from(self.queue.max_attempts),
        );
        must_be_positive(
            &mut errors,
            "queue.backoff_base_ms",
            self.queue.backoff_base_ms,
        );
        if self.queue.backoff_cap_ms < self.queue.backoff_base_ms {
            errors.push(ValidationError {
                field: "queue.backoff_cap_ms".into(),
                message: format!(
                    "backoff_cap_ms ({}) must not be below backoff_base_ms ({})",
                    self.queue.backoff_cap_ms, self.queue.backoff_base_ms
                ),
            });
        }

        // --- cache ---
        for (name, policy) in &self.cache.policies {
            if name.trim().is_empty() {
                errors.push(ValidationError {
                    field: "cache.policies".into(),
                    message: "cache name must not be empty".into(),
                });
            }
            must_be_positive(
                &mut errors,
                &format!("cache.policies.{name}.max_age_secs"),
                policy.max_age_secs,
            );
            must_be_positive(
                &mut errors,
                &format!("cache.policies.{name}.max_entries"),
                policy.max_entries as u64,
            );
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        // --- storage ---
        if self.storage.database_path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.database_path".into(),
                message: "must not be empty".into(),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust
/// use tidepool_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .remote_base_url("https://project.example.co")
///     .sync_batch_size(25)
///     .logging_level("debug")
///     .build();
/// assert_eq!(config.sync.batch_size, 25);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote.api_key = key.into();
        self
    }

    pub fn remote_request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote.request_timeout_secs = secs;
        self
    }

    pub fn remote_health_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote.health_timeout_secs = secs;
        self
    }

    pub fn remote_probe_table(mut self, table: impl Into<String>) -> Self {
        self.config.remote.probe_table = table.into();
        self
    }

    // --- sync ---

    pub fn sync_batch_size(mut self, size: usize) -> Self {
        self.config.sync.batch_size = size;
        self
    }

    pub fn sync_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.sync.retry_attempts = attempts;
        self
    }

    pub fn sync_retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.sync.retry_delay_ms = ms;
        self
    }

    pub fn sync_interval_ms(mut self, ms: u64) -> Self {
        self.config.sync.sync_interval_ms = ms;
        self
    }

    pub fn sync_pull_remote(mut self, pull: bool) -> Self {
        self.config.sync.pull_remote = pull;
        self
    }

    pub fn sync_discovery(mut self, mode: DiscoveryMode) -> Self {
        self.config.sync.discovery = mode;
        self
    }

    pub fn sync_include_tables(mut self, tables: Vec<String>) -> Self {
        self.config.sync.include_tables = tables;
        self
    }

    pub fn sync_exclude_tables(mut self, tables: Vec<String>) -> Self {
        self.config.sync.exclude_tables = tables;
        self
    }

    // --- queue ---

    pub fn queue_max_attempts(mut self, attempts: u32) -> Self {
        self.config.queue.max_attempts = attempts;
        self
    }

    pub fn queue_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.config.queue.backoff_base_ms = base_ms;
        self.config.queue.backoff_cap_ms = cap_ms;
        self
    }

    pub fn queue_process_interval_secs(mut self, secs: u64) -> Self {
        self.config.queue.process_interval_secs = secs;
        self
    }

    // --- cache ---

    pub fn cache_persistent(mut self, persistent: bool) -> Self {
        self.config.cache.persistent = persistent;
        self
    }

    pub fn cache_policy(mut self, name: impl Into<String>, policy: CachePolicyConfig) -> Self {
        self.config.cache.policies.insert(name.into(), policy);
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    // --- storage ---

    pub fn storage_database_path(mut self, path: PathBuf) -> Self {
        self.config.storage.database_path = path;
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
