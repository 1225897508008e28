//! Cache entries and strategies

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// A cached value with its write time and expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: serde_json::Value,
    /// Write time; eviction removes the oldest first
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry written at `now` that lives for `max_age`
    pub fn new(
        key: impl Into<String>,
        data: serde_json::Value,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            data,
            timestamp: now,
            expires_at: now + max_age,
        }
    }

    /// Whether the entry is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// How a named cache combines stored values with the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStrategy {
    /// Serve a fresh cached value, otherwise fetch and store
    CacheFirst,
    /// Always fetch; fall back to any cached value on failure
    NetworkFirst,
    /// Serve the cached value now and refresh it in the background
    StaleWhileRevalidate,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheStrategy::CacheFirst => "cache-first",
            CacheStrategy::NetworkFirst => "network-first",
            CacheStrategy::StaleWhileRevalidate => "stale-while-revalidate",
        };
        f.write_str(s)
    }
}

impl FromStr for CacheStrategy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache-first" => Ok(CacheStrategy::CacheFirst),
            "network-first" => Ok(CacheStrategy::NetworkFirst),
            "stale-while-revalidate" => Ok(CacheStrategy::StaleWhileRevalidate),
            other => Err(DomainError::ValidationFailed(format!(
                "unknown cache strategy '{other}'"
            ))),
        }
    }
}
