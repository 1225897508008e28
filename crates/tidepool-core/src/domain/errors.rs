//! Domain error types
//!
//! This module defines two error families:
//! - [`DomainError`] for validation failures on domain values
//! - [`SyncError`], the error taxonomy shared by every port in the sync core

use thiserror::Error;

/// Errors that can occur when validating domain values
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Table name is empty or contains characters not allowed in a REST path
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// A record is missing its `id` or the id is not a string
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// An HTTP method string is not recognised
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    /// Two translator rules claim the same field with different kinds
    #[error("Conflicting field rules for '{field}': {first} vs {second}")]
    ConflictingFieldRules {
        /// The field name both rules match
        field: String,
        /// Kind assigned by the first rule
        first: String,
        /// Kind assigned by the second rule
        second: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Error taxonomy of the sync core
///
/// Adapter crates map their own errors into these variants at the port
/// boundary, so orchestration code can decide on retries and error
/// accounting without knowing which adapter produced the failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Transport-level failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// The remote backend returned a non-success status
    #[error("Backend error ({status}): {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Message extracted from the structured error body
        message: String,
    },

    /// Malformed batch or constraint violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The embedded database failed
    #[error("Local store error: {0}")]
    LocalStore(String),

    /// Remote schema discovery failed; callers fall back to the static list
    #[error("Schema discovery unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// A full sync pass finished but some tables failed
    #[error("Sync pass failed for {} table(s): {}", failed_tables.len(), failed_tables.join(", "))]
    PartialFailure {
        /// Names of the tables that failed, in sync order
        failed_tables: Vec<String>,
    },

    /// A domain value failed validation
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl SyncError {
    /// Whether repeating the same idempotent call may succeed
    ///
    /// Network errors are always retryable. Backend errors are retryable
    /// only for server-side failures (5xx) and throttling (429).
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Backend { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
