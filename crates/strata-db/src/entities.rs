//! Persisted entity definitions.
//!
//! This module defines the rows the object store persists:
//! - [`ObjectRecord`] - An immutable, content-addressed object (patches included)
//! - [`StateViewEntry`] - One entry of the materialized projection
//! - [`ViewRecord`] - A named view and its HEAD patch
//! - [`SourceRecord`] - A registered external source
//! - [`PathIndexEntry`] - Per-source drift bookkeeping for one tracked path
//! - [`CommitBatch`] - The writes of one patch commit, applied atomically
//!
//! ## JSON Field Names
//!
//! All structs use camelCase for JSON serialization so exported bundles match
//! the persisted payload shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Object type discriminator for patches.
///
/// The store indexes the `target` field of objects of this type.
pub const PATCH_TYPE: &str = "patch";

/// Legacy config key mirroring the HEAD of the default view.
pub const LEGACY_HEAD_KEY: &str = "head";

/// Current schema version written to the `meta` table.
pub const SCHEMA_VERSION: &str = "strata-v1";

// ============================================================================
// ObjectRecord
// ============================================================================

/// An immutable object as stored.
///
/// The store does not compute or check `id`; it is the content address of
/// `{type, content, createdAt}` computed by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    /// Content address.
    pub id: String,

    /// Type discriminator (`patch`, `note`, `file`, `relation`, ...).
    #[serde(rename = "type")]
    pub object_type: String,

    /// Structured payload.
    pub content: serde_json::Value,

    /// Creation time, millisecond precision.
    pub created_at: DateTime<Utc>,
}

impl ObjectRecord {
    /// Whether this record is a patch.
    pub fn is_patch(&self) -> bool {
        self.object_type == PATCH_TYPE
    }

    /// The `target` field of a patch payload, if present.
    pub fn patch_target(&self) -> Option<&str> {
        if !self.is_patch() {
            return None;
        }
        self.content.get("target").and_then(|v| v.as_str())
    }
}

/// Result of inserting an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// An identical row was already present; nothing was written.
    AlreadyPresent,
}

// ============================================================================
// StateViewEntry
// ============================================================================

/// One entry of the state-view projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateViewEntry {
    /// Id of the projected object.
    pub object_id: String,

    /// Current type.
    #[serde(rename = "type")]
    pub object_type: String,

    /// Current content.
    pub content: serde_json::Value,

    /// Tombstone flag.
    pub is_deleted: bool,

    /// Time of the last patch that touched this entry.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// ViewRecord
// ============================================================================

/// A named view and its HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRecord {
    /// View name.
    pub name: String,

    /// HEAD patch id, `None` until the first commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_id: Option<String>,

    /// Creation time.
    pub created_at: DateTime<Utc>,

    /// Time the HEAD last moved.
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Sources and path index
// ============================================================================

/// A registered external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    /// Unique id (UUID v4).
    pub id: String,

    /// Unique human-facing name, usable as an alias for `id`.
    pub name: String,

    /// Adapter kind (`local`, `git`, ...).
    pub kind: String,

    /// Adapter settings.
    #[serde(default)]
    pub settings: serde_json::Value,

    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Drift bookkeeping for one tracked path of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathIndexEntry {
    /// Owning source id.
    pub source_id: String,

    /// Source-relative path, `/`-separated.
    pub path: String,

    /// Content address of the file bytes when last tracked.
    pub content_id: String,

    /// Projection object the path was materialized into.
    pub object_id: String,

    /// Object type (`note` or `file`).
    pub object_type: String,

    /// File size in bytes.
    pub size: u64,

    /// Modification time (Unix seconds).
    pub mtime: u64,

    /// When this entry was last written.
    pub tracked_at: DateTime<Utc>,
}

/// A path-index mutation carried by a commit batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathIndexWrite {
    /// Insert or replace the entry for `(source_id, path)`.
    Upsert(PathIndexEntry),
    /// Remove the entry for `(source_id, path)` if present.
    Remove { source_id: String, path: String },
}

// ============================================================================
// CommitBatch
// ============================================================================

/// Every write belonging to one patch commit.
///
/// Backends apply a batch in a single transaction: either the patch exists,
/// the view HEAD points at it and all projection/path-index writes are
/// visible, or none of it happened.
#[derive(Debug, Clone)]
pub struct CommitBatch {
    /// View whose HEAD advances.
    pub view: String,

    /// HEAD the caller built the patch on; the commit fails if it moved.
    pub expected_head: Option<String>,

    /// The patch object.
    pub patch: ObjectRecord,

    /// Non-patch objects created by this patch (e.g. the object an `add`
    /// materializes), inserted idempotently before the patch.
    pub objects: Vec<ObjectRecord>,

    /// Projection entries to upsert.
    pub projection: Vec<StateViewEntry>,

    /// Path-index mutations.
    pub path_index: Vec<PathIndexWrite>,

    /// Also write the legacy global `head` config key.
    pub mirror_legacy_head: bool,
}

/// What a committed batch changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// New HEAD of the view.
    pub head_id: String,

    /// Previous HEAD of the view.
    pub parent_id: Option<String>,

    /// Whether the patch row was new.
    pub insert: InsertOutcome,

    /// Number of projection entries written.
    pub projection_writes: usize,
}
