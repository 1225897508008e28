//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync core depends
//! on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ILocalStore`] - Embedded database holding the mirrored tables
//! - [`IRemoteBackend`] - REST backend the tables are synchronized with
//! - [`IRequestStore`] - Durable storage for the offline request queue
//! - [`ICacheStore`] - Persistent backing store for named caches
//!
//! All ports report failures with the shared
//! [`SyncError`](crate::domain::SyncError) taxonomy.

pub mod cache_store;
pub mod local_store;
pub mod remote_backend;
pub mod request_store;

pub use cache_store::ICacheStore;
pub use local_store::{ILocalStore, RowVersion, WriteBatch, WriteOp};
pub use remote_backend::IRemoteBackend;
pub use request_store::IRequestStore;
