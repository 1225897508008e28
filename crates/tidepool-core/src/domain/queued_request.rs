//! Queued outbound HTTP requests
//!
//! A [`QueuedRequest`] is an HTTP request captured while the device was
//! offline (or explicitly deferred) and waiting to be replayed.
//!
//! ## State machine
//!
//! ```text
//! Pending ──replay ok──→ Sent (deleted)
//!    │
//!    └──replay fails──→ Pending (attempts + 1, next_retry_at pushed back)
//!                          │
//!                          └──attempts >= max_attempts──→ Failed (deleted)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

/// HTTP methods accepted by the offline queue
const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Replay status of a queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Waiting for (another) replay attempt
    Pending,
    /// Replayed successfully
    Sent,
    /// Gave up after exhausting the retry budget
    Failed,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Sent => "sent",
            RequestStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for RequestStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "sent" => Ok(RequestStatus::Sent),
            "failed" => Ok(RequestStatus::Failed),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown request status '{other}'"
            ))),
        }
    }
}

/// Exponential backoff parameters for queue replay
///
/// The delay after the `n`-th failed attempt is `min(cap, base * 2^n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds
    pub base_ms: u64,
    /// Upper bound for a single delay in milliseconds
    pub cap_ms: u64,
    /// Attempts after which a request is abandoned
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 60_000,
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the number of attempts made so far
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 2u64.checked_pow(attempts).unwrap_or(u64::MAX);
        let millis = self.base_ms.saturating_mul(factor).min(self.cap_ms);
        Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
    }
}

/// A durably stored outbound HTTP request awaiting replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Creation time; replay order is ascending by this value
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub status: RequestStatus,
}

impl QueuedRequest {
    /// Creates a pending request, due immediately
    ///
    /// # Errors
    /// Returns an error if the method is unknown or the URL is empty.
    pub fn new(method: &str, url: impl Into<String>) -> Result<Self, DomainError> {
        Self::new_at(method, url, Utc::now())
    }

    /// Creates a pending request with an explicit creation time
    pub fn new_at(
        method: &str,
        url: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let method = method.to_ascii_uppercase();
        if !VALID_METHODS.contains(&method.as_str()) {
            return Err(DomainError::InvalidMethod(method));
        }
        let url = url.into();
        if url.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "request url must not be empty".to_string(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            url,
            method,
            headers: BTreeMap::new(),
            body: None,
            timestamp,
            attempts: 0,
            next_retry_at: timestamp,
            status: RequestStatus::Pending,
        })
    }

    /// Adds a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the request body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether the request may be attempted at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Pending && self.next_retry_at <= now
    }

    /// Records a failed replay attempt at `now`
    ///
    /// Increments `attempts`; once the budget is exhausted the status becomes
    /// [`RequestStatus::Failed`], otherwise `next_retry_at` is pushed back by
    /// the policy's backoff delay. Returns `true` if the request is now failed.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &BackoffPolicy) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= policy.max_attempts {
            self.status = RequestStatus::Failed;
            return true;
        }
        self.next_retry_at = now + policy.delay_for(self.attempts);
        false
    }

    /// Marks the request as replayed successfully
    pub fn mark_sent(&mut self) {
        self.status = RequestStatus::Sent;
    }
}
