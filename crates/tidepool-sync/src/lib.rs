//! Tidepool Sync - Table synchronization engine
//!
//! Provides:
//! - The schema registry deciding which tables are synchronized
//! - Batched push of pending local records with retry
//! - Pull of remote rows that never overwrites pending local edits
//! - Interval-driven automatic sync
//!
//! ## Modules
//!
//! - [`registry`] - Static and dynamic table discovery, exclusion rules
//! - [`orchestrator`] - Guarded sync passes, per-table push and pull
//! - [`scheduler`] - Background auto-sync timer
//!
//! Tables are synced in registry order, one at a time. There is no
//! foreign-key ordering: a child table listed before its parent is pushed
//! first.

pub mod orchestrator;
pub mod registry;
pub mod scheduler;

pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncOutcome, SyncReport, TableOutcome};
pub use registry::{SchemaRegistry, TableReport, KNOWN_TABLES};
