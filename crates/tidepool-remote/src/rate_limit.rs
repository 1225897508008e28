//! Throttling support
//!
//! The backend answers 429 when a client exceeds its request budget and may
//! say how long to wait in a `Retry-After` header, either as delta-seconds
//! or as an HTTP-date.

use std::time::Duration;

use tracing::warn;

/// Longest wait honoured from either `Retry-After` form
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Parses a `Retry-After` header value, returning `default` when it is
/// missing a usable value. Waits are capped at one hour.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds).min(MAX_RETRY_AFTER);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target <= now {
            return Duration::ZERO;
        }
        if let Ok(wait) = (target - now).to_std() {
            return wait.min(MAX_RETRY_AFTER);
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
