//! REST backend client
//!
//! Provides a typed HTTP client for a PostgREST-style backend. Handles the
//! `apikey`/bearer authentication headers, request timeouts, 429 retries and
//! mapping of non-success responses to [`RemoteError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tidepool_remote::RestClient;
//!
//! # async fn example() -> Result<(), tidepool_remote::RemoteError> {
//! let client = RestClient::with_base_url("anon-key", "https://project.example.co");
//! let rows = client.fetch_all("notes").await?;
//! println!("{} notes", rows.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::{header::HeaderValue, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use tidepool_core::config::RemoteConfig;
use tidepool_core::domain::table::validate_table_name;
use tidepool_core::domain::{SyncableRecord, ID_FIELD};

use crate::rate_limit::parse_retry_after;
use crate::RemoteError;

/// Path prefix of the REST interface below the base URL
const REST_PREFIX: &str = "/rest/v1";

/// `Prefer` header for idempotent batch upserts
const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=minimal";

/// Default retry-after duration when the header is missing
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_PROBE_TABLE: &str = "profiles";

// ============================================================================
// Response types
// ============================================================================

/// Structured error body returned by the backend
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    details: Option<String>,
}

/// The parts of the OpenAPI root document used for discovery
#[derive(Debug, Deserialize)]
struct OpenApiDocument {
    definitions: Option<serde_json::Map<String, Value>>,
}

// ============================================================================
// RestClient
// ============================================================================

/// HTTP client for the REST backend
///
/// Wraps `reqwest::Client` with authentication headers, base URL
/// construction, bounded timeouts and automatic 429 handling.
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    health_timeout: Duration,
    max_rate_limit_retries: u32,
    probe_table: String,
}

impl RestClient {
    /// Creates a client from the `remote` configuration section
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            health_timeout: Duration::from_secs(config.health_timeout_secs),
            max_rate_limit_retries: config.max_rate_limit_retries,
            probe_table: config.probe_table.clone(),
        }
    }

    /// Creates a client with default timeouts for the given base URL
    /// (useful for testing)
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            max_rate_limit_retries: DEFAULT_MAX_RETRIES,
            probe_table: DEFAULT_PROBE_TABLE.to_string(),
        }
    }

    /// Sets the table queried by [`health_check`](Self::health_check)
    pub fn with_probe_table(mut self, table: impl Into<String>) -> Self {
        self.probe_table = table.into();
        self
    }

    /// Sets the request and health-probe timeouts
    pub fn with_timeouts(mut self, request: Duration, health: Duration) -> Self {
        self.request_timeout = request;
        self.health_timeout = health;
        self
    }

    /// Sets how many times a throttled request is retried
    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for a path below `/rest/v1`
    ///
    /// Adds the `apikey` header, the bearer token and the request timeout.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}{}", self.base_url, REST_PREFIX, path);
        self.client
            .request(method, &url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
    }

    // ========================================================================
    // Endpoint calls
    // ========================================================================

    /// Fetches every row of a table
    pub async fn fetch_all(&self, table: &str) -> Result<Vec<SyncableRecord>, RemoteError> {
        check_identifier(table)?;
        let path = format!("/{table}?select=*");

        let response = self
            .execute_with_retry(&path, || self.request(Method::GET, &path))
            .await?;
        let response = ensure_success(response).await?;

        let rows: Vec<Value> = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("{table}: {e}")))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = SyncableRecord::from_value(row)
                .map_err(|e| RemoteError::InvalidResponse(format!("{table}: {e}")))?;
            records.push(record);
        }

        debug!(table, rows = records.len(), "Fetched remote table");
        Ok(records)
    }

    /// Upserts a batch of records keyed on `conflict_key`
    ///
    /// An empty batch returns immediately without network I/O.
    pub async fn upsert(
        &self,
        table: &str,
        records: &[SyncableRecord],
        conflict_key: &str,
    ) -> Result<(), RemoteError> {
        if records.is_empty() {
            return Ok(());
        }
        check_identifier(table)?;
        check_identifier(conflict_key)?;

        if conflict_key != ID_FIELD {
            if let Some(missing) = records.iter().find(|r| r.get(conflict_key).is_none()) {
                return Err(RemoteError::InvalidRecord(format!(
                    "record '{}' has no conflict key '{}'",
                    missing.id(),
                    conflict_key
                )));
            }
        }

        let body: Vec<Value> = records.iter().cloned().map(SyncableRecord::into_value).collect();
        let path = format!("/{table}?on_conflict={conflict_key}");

        let response = self
            .execute_with_retry(&path, || {
                self.request(Method::POST, &path)
                    .header("Prefer", UPSERT_PREFER)
                    .json(&body)
            })
            .await?;
        ensure_success(response).await?;

        debug!(table, records = records.len(), "Upserted batch");
        Ok(())
    }

    /// Probes the backend with a cheap query; never fails
    pub async fn health_check(&self) -> bool {
        let path = format!("/{}?select=count&limit=1", self.probe_table);
        let result = self
            .request(Method::GET, &path)
            .timeout(self.health_timeout)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(status = response.status().as_u16(), "Health probe failed");
                false
            }
            Err(e) => {
                debug!(error = %e, "Health probe unreachable");
                false
            }
        }
    }

    /// Lists the tables exposed by the backend, sorted by name
    pub async fn list_tables(&self) -> Result<Vec<String>, RemoteError> {
        let response = self
            .execute_with_retry("/", || self.request(Method::GET, "/"))
            .await
            .map_err(|e| RemoteError::DiscoveryUnavailable(e.to_string()))?;
        let response = ensure_success(response)
            .await
            .map_err(|e| RemoteError::DiscoveryUnavailable(e.to_string()))?;

        let document: OpenApiDocument = response.json().await.map_err(|e| {
            RemoteError::DiscoveryUnavailable(format!("unreadable schema document: {e}"))
        })?;
        let definitions = document.definitions.ok_or_else(|| {
            RemoteError::DiscoveryUnavailable("schema document has no definitions".to_string())
        })?;

        let mut tables: Vec<String> = definitions.into_iter().map(|(name, _)| name).collect();
        tables.sort();
        debug!(tables = tables.len(), "Discovered remote tables");
        Ok(tables)
    }

    /// Counts the rows of a table using `Prefer: count=exact`
    pub async fn count_rows(&self, table: &str) -> Result<u64, RemoteError> {
        check_identifier(table)?;
        let path = format!("/{table}?select={ID_FIELD}");

        let response = self
            .execute_with_retry(&path, || {
                self.request(Method::GET, &path)
                    .header("Prefer", "count=exact")
                    .header("Range-Unit", "items")
                    .header("Range", "0-0")
            })
            .await?;
        let response = ensure_success(response).await?;

        let content_range = response
            .headers()
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                RemoteError::InvalidResponse(format!("{table}: missing Content-Range header"))
            })?;
        parse_content_range_total(content_range)
            .ok_or_else(|| RemoteError::InvalidResponse(format!(
                "{table}: unexpected Content-Range '{content_range}'"
            )))
    }

    // ========================================================================
    // execute_with_retry - 429 response handling
    // ========================================================================

    /// Sends a request, retrying while the backend answers 429
    ///
    /// `build` is called once per attempt so the request body can be resent.
    /// Honours `Retry-After`; after `max_rate_limit_retries` retries the
    /// throttling is surfaced as [`RemoteError::TooManyRequests`]. Any other
    /// response, successful or not, is returned to the caller.
    pub async fn execute_with_retry<F>(&self, path: &str, build: F) -> Result<Response, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let response = build().send().await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                if attempt > 0 {
                    info!(path, attempt, "Request succeeded after retry");
                }
                return Ok(response);
            }

            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v: &HeaderValue| v.to_str().ok())
                .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
                .unwrap_or(DEFAULT_RETRY_AFTER);

            if attempt >= self.max_rate_limit_retries {
                warn!(path, attempts = attempt + 1, "429 retry limit exhausted");
                return Err(RemoteError::TooManyRequests { retry_after });
            }

            info!(
                path,
                attempt,
                retry_after_ms = retry_after.as_millis() as u64,
                "Received 429, backing off"
            );
            tokio::time::sleep(retry_after).await;
            attempt += 1;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn check_identifier(name: &str) -> Result<(), RemoteError> {
    validate_table_name(name).map_err(|e| RemoteError::InvalidRecord(e.to_string()))
}

/// Passes successful responses through; turns the rest into errors
async fn ensure_success(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(status, &body);

    match status.as_u16() {
        400 | 409 | 422 => Err(RemoteError::Conflict {
            status: status.as_u16(),
            message,
        }),
        code => Err(RemoteError::Http {
            status: code,
            message,
        }),
    }
}

/// Extracts a readable message from an error body
///
/// Prefers the structured `message`/`code`/`details` fields and falls back
/// to the raw body, then to the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.message {
            let mut out = message;
            if let Some(code) = parsed.code {
                out.push_str(&format!(" (code {code})"));
            }
            if let Some(details) = parsed.details {
                out.push_str(&format!(": {details}"));
            }
            return out;
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.chars().take(500).collect();
    }
    status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string()
}

/// Parses the total from a `Content-Range` value such as `0-0/42` or `*/0`
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.parse().ok()
}
