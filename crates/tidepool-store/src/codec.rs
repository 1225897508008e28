//! Conversions between domain values and their SQL column representation
//!
//! | Domain Type       | SQL Type | Strategy                                   |
//! |-------------------|----------|--------------------------------------------|
//! | DateTime<Utc>     | TEXT     | RFC 3339, nanoseconds, `Z` (sorts lexically)    |
//! | SyncableRecord    | TEXT     | serde_json object including `id`           |
//! | headers map       | TEXT     | serde_json object                          |
//! | RequestStatus     | TEXT     | `Display` / `FromStr`                      |

use chrono::{DateTime, SecondsFormat, Utc};

use crate::StoreError;

/// Format a timestamp for storage
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a DateTime<Utc> from its stored string
pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite default format, e.g. from CURRENT_TIMESTAMP
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| {
            StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e))
        })
}

/// Parse an optional DateTime<Utc> from an optional string
pub(crate) fn parse_optional_datetime(
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_datetime(val).map(Some),
        _ => Ok(None),
    }
}
