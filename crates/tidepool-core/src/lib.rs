//! Tidepool Core - Domain types and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `SyncableRecord`, `TableDescriptor`, `SyncStatus`,
//!   `QueuedRequest`, `CacheEntry`
//! - **Record translation** - declarative local/remote field conversion
//! - **Port definitions** - Traits for adapters: `ILocalStore`, `IRemoteBackend`,
//!   `IRequestStore`, `ICacheStore`
//! - **Configuration** - YAML-backed settings with validation
//!
//! # Architecture
//!
//! The domain module is pure logic with no I/O. Ports define the trait
//! interfaces that adapter crates (`tidepool-store`, `tidepool-remote`)
//! implement, and that the orchestration crates (`tidepool-sync`,
//! `tidepool-queue`, `tidepool-cache`) depend on.

pub mod config;
pub mod domain;
pub mod ports;
