//! Domain entities and business logic
//!
//! This module contains the core domain types for Tidepool:
//! - Syncable records and their local sync markers
//! - Table descriptors for the schema registry
//! - Process-wide sync status snapshots
//! - Queued outbound HTTP requests
//! - Cache entries
//! - The record translator (local <-> remote wire representation)
//! - Domain-specific error types

pub mod cache_entry;
pub mod errors;
pub mod queued_request;
pub mod record;
pub mod status;
pub mod table;
pub mod translator;

// Re-export commonly used types
pub use cache_entry::{CacheEntry, CacheStrategy};
pub use errors::{DomainError, SyncError};
pub use queued_request::{BackoffPolicy, QueuedRequest, RequestStatus};
pub use record::{LocalRecord, SyncableRecord, ID_FIELD};
pub use status::SyncStatus;
pub use table::{TableCategory, TableDescriptor};
pub use translator::{FieldKind, FieldRule, RecordTranslator};
