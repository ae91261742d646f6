//! # strata-core
//!
//! **Strata** – a local, embeddable versioned knowledge store.
//!
//! Every change to the knowledge base is an immutable, content-addressed
//! patch appended to a view's history. The current state of every object is
//! a projection rebuilt from that history on demand. External sources
//! (directories of notes and files) are scanned, diffed against what was
//! recorded last time and turned into patches.
//!
//! ## Main Types
//!
//! - [`Repository`] – a resolved `.strata` directory on disk
//! - [`Session`] – an open store plus the active view and agent
//! - [`Object`] / [`Patch`] – content-addressed records
//! - [`StrataError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`hash`] – canonical JSON and content addressing
//! - [`patch_manager`] – commit, history, ref resolution, projection rebuild
//! - [`scanner`] / [`detector`] – workspace scanning and change detection
//! - [`diff`] – structural diff between two snapshots
//! - [`sync`] – scan → detect → commit orchestration per source
//! - [`bundle`] – export and import of whole stores
//!
//! ## Example
//!
//! ```ignore
//! use strata_core::{sync_source, DefaultProcessor, Repository, SourceKind};
//! use serde_json::json;
//! use std::path::Path;
//!
//! let repo = Repository::init(Path::new("."))?;
//! let mut session = repo.open_session()?;
//!
//! strata_core::add_source(&mut session, "notes", SourceKind::Local, json!({"root": "./notes"}))?;
//! let report = sync_source(&mut session, "notes", &DefaultProcessor)?;
//! println!("{} committed, {} failed", report.succeeded.len(), report.failed.len());
//! ```

// Modules
pub mod adapter;
pub mod bundle;
pub mod config;
pub mod constants;
pub mod detector;
pub mod diff;
pub mod errors;
pub mod hash;
pub mod object;
pub mod patch;
pub mod patch_manager;
pub mod payload;
pub mod processor;
pub mod projection;
pub mod repository;
pub mod scanner;
pub mod session;
pub mod sources;
pub mod sync;
pub mod view;

// Re-exports for convenience
pub use adapter::{adapter_for, LocalAdapter, SourceAdapter, SourceKind, UnsupportedAdapter};
pub use bundle::{
    export_bundle, import_bundle, read_bundle, write_bundle, Bundle, BundleView, ImportReport,
    BUNDLE_FORMAT,
};
pub use config::{ConfigLayer, ScanSection, StoreSection, StrataConfig};
pub use constants::{
    DEFAULT_AGENT, DEFAULT_VIEW, GLOBAL_CONFIG_FILENAME, IGNORE_FILENAME, PROJECT_CONFIG_FILENAME,
    STORE_FILENAME, STRATA_DIR, STRATA_HOME_DIR,
};
pub use detector::{detect_changes, ChangeSet, Modified, Renamed, Unscanned};
pub use diff::{
    deep_equal, diff_snapshots, snapshot_from_entries, snapshot_of, DiffObject, FieldChange,
    ModifiedObject, Snapshot, SnapshotDiff, SnapshotObject,
};
pub use errors::{EntityKind, StrataError, StrataResult};
pub use hash::{canonical_json, hash_bytes, hash_value};
pub use object::Object;
pub use patch::{Patch, PatchOp, PatchOpKind, PatchRecord, PatchRequest};
pub use patch_manager::{
    commit, history, log, rebuild_projection, resolve_ref, snapshot_at, CommitOutcome,
    CommitReport, RebuildReport,
};
pub use payload::{FilePayload, NotePayload, ObjectType, Payload, RelationPayload};
pub use processor::{ContentProcessor, DefaultProcessor};
pub use projection::{Projection, ProjectionEffect, SkipReason};
pub use repository::Repository;
pub use scanner::{
    scan, FileEntry, FileKind, IgnoreRules, ScanOptions, ScanReport, SkippedFile, SkippedReason,
};
pub use session::Session;
pub use sources::{add_source, get_source, list_sources, path_index, remove_source};
pub use sync::{status, sync_source, SyncAction, SyncFailure, SyncItem, SyncReport};
pub use view::{is_valid_view_name, ViewName};

// Storage records surfaced through the session API
pub use strata_db::{PathIndexEntry, SourceRecord, StateViewEntry, ViewRecord};
