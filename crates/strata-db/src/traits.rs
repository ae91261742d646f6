//! Object store traits and configuration.
//!
//! This module defines the core abstraction for object store backends.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::entities::{
    CommitBatch, CommitReceipt, InsertOutcome, ObjectRecord, PathIndexEntry, SourceRecord,
    StateViewEntry, ViewRecord,
};
use crate::error::DbResult;

// ============================================================================
// StoreConfig
// ============================================================================

/// Configuration for an object store.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Path to the database file. `None` opens a private in-memory store.
    pub path: Option<PathBuf>,

    /// How long a writer waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    /// Default busy timeout.
    pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

    /// Create a configuration for an on-disk store.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            busy_timeout_ms: Self::DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    /// Create a configuration for an in-memory store.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            busy_timeout_ms: Self::DEFAULT_BUSY_TIMEOUT_MS,
        }
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.busy_timeout_ms = timeout_ms;
        self
    }
}

// ============================================================================
// ObjectStoreBackend Trait
// ============================================================================

/// Trait for object store backend implementations.
///
/// Backends persist immutable objects, the state-view projection, named views
/// and a small key/value config space, plus per-source path-index bookkeeping.
///
/// ## Atomicity
///
/// Every method is atomic on its own. [`commit_patch`](Self::commit_patch)
/// applies the object insert, HEAD advance, projection writes and path-index
/// writes of one patch as a single unit.
pub trait ObjectStoreBackend: Send {
    // ========================================================================
    // Objects
    // ========================================================================

    /// Persist an object.
    ///
    /// Inserting a record whose id is already stored is a no-op when the stored
    /// record is identical ([`InsertOutcome::AlreadyPresent`]) and fails with
    /// [`DbError::Conflict`](crate::DbError::Conflict) otherwise.
    fn insert_object(&mut self, record: &ObjectRecord) -> DbResult<InsertOutcome>;

    /// Get an object by id.
    fn get_object(&self, id: &str) -> DbResult<Option<ObjectRecord>>;

    /// Get all objects of one type, oldest first.
    fn get_objects_by_type(&self, object_type: &str) -> DbResult<Vec<ObjectRecord>>;

    /// Get every patch whose `target` equals `target`, oldest first.
    fn get_patches_by_target(&self, target: &str) -> DbResult<Vec<ObjectRecord>>;

    /// Get patches newest first, optionally bounded.
    fn get_all_patches(&self, limit: Option<usize>) -> DbResult<Vec<ObjectRecord>>;

    /// Get every patch in replay order (creation time, then insertion order).
    fn get_patch_log(&self) -> DbResult<Vec<ObjectRecord>>;

    /// Get every object in insertion order.
    fn get_all_objects(&self) -> DbResult<Vec<ObjectRecord>>;

    // ========================================================================
    // Projection
    // ========================================================================

    /// Insert or replace a projection entry.
    fn upsert_state_view(&mut self, entry: &StateViewEntry) -> DbResult<()>;

    /// Get a live (non-tombstoned) projection entry.
    fn get_state_view_object(&self, object_id: &str) -> DbResult<Option<StateViewEntry>>;

    /// Get a projection entry including tombstones.
    fn get_state_view_entry(&self, object_id: &str) -> DbResult<Option<StateViewEntry>>;

    /// Get projection entries, optionally filtered by type, ordered by id.
    fn get_all_state_view_objects(
        &self,
        object_type: Option<&str>,
        include_deleted: bool,
    ) -> DbResult<Vec<StateViewEntry>>;

    /// Atomically replace the whole projection.
    fn replace_state_view(&mut self, entries: &[StateViewEntry]) -> DbResult<()>;

    // ========================================================================
    // Views
    // ========================================================================

    /// Get a view by name.
    fn get_view(&self, name: &str) -> DbResult<Option<ViewRecord>>;

    /// Create an empty view. Fails if it already exists.
    fn create_view(&mut self, name: &str, at: DateTime<Utc>) -> DbResult<ViewRecord>;

    /// Set a view's HEAD, creating the view if needed.
    fn update_view(&mut self, name: &str, head_id: Option<&str>) -> DbResult<()>;

    /// Delete a view. Returns whether it existed. Patches are kept.
    fn delete_view(&mut self, name: &str) -> DbResult<bool>;

    /// List all views ordered by name.
    fn list_views(&self) -> DbResult<Vec<ViewRecord>>;

    // ========================================================================
    // Config
    // ========================================================================

    /// Read a config value.
    fn get_config(&self, key: &str) -> DbResult<Option<String>>;

    /// Write a config value.
    fn set_config(&mut self, key: &str, value: &str) -> DbResult<()>;

    // ========================================================================
    // Sources and path index
    // ========================================================================

    /// Register a source. Fails if the name is taken.
    fn insert_source(&mut self, source: &SourceRecord) -> DbResult<()>;

    /// Get a source by id.
    fn get_source(&self, id: &str) -> DbResult<Option<SourceRecord>>;

    /// Get a source by name.
    fn get_source_by_name(&self, name: &str) -> DbResult<Option<SourceRecord>>;

    /// List all sources ordered by name.
    fn list_sources(&self) -> DbResult<Vec<SourceRecord>>;

    /// Remove a source and its path index. Returns whether it existed.
    fn delete_source(&mut self, id: &str) -> DbResult<bool>;

    /// Get the path index of a source ordered by path.
    fn get_path_index(&self, source_id: &str) -> DbResult<Vec<PathIndexEntry>>;

    // ========================================================================
    // Composite writes
    // ========================================================================

    /// Apply every write of one patch commit atomically.
    ///
    /// Fails with [`DbError::HeadMoved`](crate::DbError::HeadMoved) without
    /// writing anything if the view HEAD is not `batch.expected_head`.
    fn commit_patch(&mut self, batch: &CommitBatch) -> DbResult<CommitReceipt>;
}

// ============================================================================
// Tests
// ============================================================================
