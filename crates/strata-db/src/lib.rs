//! # strata-db
//!
//! Infrastructure layer for Strata - durable object store persistence.
//!
//! This crate provides the storage implementation that is isolated from the
//! core domain logic in `strata-core`. By separating these concerns:
//!
//! - `strata-core` owns hashing, patch semantics and projection rules
//! - The store only persists rows and guarantees atomic commits
//! - Testing is easier with in-memory stores
//!
//! ## Architecture
//!
//! ```text
//! strata-core → ObjectStoreBackend (trait)
//!                   ↑
//!               strata-db (SQLite implementation)
//! ```
//!
//! ## Features
//!
//! - `sqlite` (default): SQLite store with WAL journaling
//!
//! ## Usage
//!
//! ```ignore
//! use strata_db::{open_store, StoreConfig};
//!
//! let mut store = open_store(&StoreConfig::new("/path/to/.strata/store.db"))?;
//! store.set_config("hello", "world")?;
//! let patches = store.get_patches_by_target("object-id")?;
//! ```

pub mod backend;
pub mod entities;
pub mod error;
pub mod traits;

pub use entities::{
    CommitBatch, CommitReceipt, InsertOutcome, ObjectRecord, PathIndexEntry, PathIndexWrite,
    SourceRecord, StateViewEntry, ViewRecord, LEGACY_HEAD_KEY, PATCH_TYPE, SCHEMA_VERSION,
};
pub use error::{DbError, DbResult};
pub use traits::{ObjectStoreBackend, StoreConfig};

#[cfg(feature = "sqlite")]
pub use backend::{open_store, SqliteStore};
