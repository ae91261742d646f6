//! Sync orchestration.
//!
//! A sync scans a source, compares the scan with the source's path index and
//! commits one patch per change. Each patch is committed together with the
//! path-index write for its path, so the index never runs ahead of or behind
//! the log. A change that fails (unreadable file, content the processor
//! rejects, ...) is recorded in the report and the rest of the batch goes on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strata_db::{PathIndexEntry, PathIndexWrite, SourceRecord};
use tracing::{debug, info, warn};

use crate::adapter::{adapter_for, SourceAdapter};
use crate::detector::{detect_changes, ChangeSet, Modified, Renamed};
use crate::errors::{StrataError, StrataResult};
use crate::hash::{now_millis, short_id};
use crate::patch::PatchRequest;
use crate::patch_manager::{commit_with_index, CommitOutcome, CommitReport};
use crate::processor::ContentProcessor;
use crate::scanner::FileEntry;
use crate::session::Session;
use crate::sources::get_source;

// ============================================================================
// Report types
// ============================================================================

/// What a sync did for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Add,
    Update,
    Rename,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Rename => "rename",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    /// Path after the change (the new path of a rename).
    pub path: String,
    pub action: SyncAction,
    pub object_id: String,
    pub patch_id: String,
}

/// A change that could not be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub path: String,
    pub action: SyncAction,
    pub error: String,
}

/// Result of [`sync_source`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Name of the synced source.
    pub source: String,
    pub succeeded: Vec<SyncItem>,
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    /// Whether every change was committed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// Status
// ============================================================================

/// Pending changes of a source, without committing anything.
///
/// # Errors
///
/// - [`StrataError::NotFound`] for an unknown source
/// - [`StrataError::Unsupported`] for a source kind that cannot be scanned
pub fn status(session: &Session, source: &str) -> StrataResult<ChangeSet> {
    let source = get_source(session, source)?;
    let adapter = adapter_for(&source, session.scan_options().clone())?;
    pending_changes(session, &source, adapter.as_ref())
}

fn pending_changes(
    session: &Session,
    source: &SourceRecord,
    adapter: &dyn SourceAdapter,
) -> StrataResult<ChangeSet> {
    let scan = adapter.scan()?;
    let index = session.store().get_path_index(&source.id)?;
    let changes = detect_changes(&scan.entries, &scan.skipped, &index);
    debug!(
        source = %source.name,
        scanned = scan.entries.len(),
        skipped = scan.skipped.len(),
        tracked = index.len(),
        changes = changes.len(),
        "Detected changes"
    );
    Ok(changes)
}

// ============================================================================
// Sync
// ============================================================================

/// Bring the active view up to date with a source.
///
/// Changes are committed in the order added, modified, renamed, deleted.
/// Files the scan could not hash are reported as failures and left as they
/// were recorded.
///
/// # Errors
///
/// Fails as a whole only if the source cannot be resolved or scanned;
/// per-change errors land in [`SyncReport::failed`].
pub fn sync_source(
    session: &mut Session,
    source: &str,
    processor: &dyn ContentProcessor,
) -> StrataResult<SyncReport> {
    let source = get_source(session, source)?;
    let adapter = adapter_for(&source, session.scan_options().clone())?;
    let changes = pending_changes(session, &source, adapter.as_ref())?;

    let mut report = SyncReport {
        source: source.name.clone(),
        ..Default::default()
    };
    for held in &changes.unscanned {
        let action = if held.object_id.is_some() {
            SyncAction::Update
        } else {
            SyncAction::Add
        };
        let err = StrataError::validation(format!("{} skipped: {}", held.path, held.reason));
        record(&mut report, &held.path, action, Err(err));
    }
    if changes.is_empty() {
        info!(source = %source.name, "Source up to date");
        return Ok(report);
    }

    let mut syncer = Syncer {
        session,
        source: &source,
        adapter: adapter.as_ref(),
        processor,
    };

    for entry in &changes.added {
        let result = syncer.add(entry);
        record(&mut report, &entry.rel_path, SyncAction::Add, result);
    }
    for change in &changes.modified {
        let result = syncer.modify(change);
        record(&mut report, &change.entry.rel_path, SyncAction::Update, result);
    }
    for change in &changes.renamed {
        let result = syncer.rename(change);
        record(&mut report, &change.new_path, SyncAction::Rename, result);
    }
    for entry in &changes.deleted {
        let result = syncer.delete(entry);
        record(&mut report, &entry.path, SyncAction::Delete, result);
    }

    info!(
        source = %source.name,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Synced source"
    );
    Ok(report)
}

fn record(
    report: &mut SyncReport,
    path: &str,
    action: SyncAction,
    result: StrataResult<CommitReport>,
) {
    match result {
        Ok(commit) => report.succeeded.push(SyncItem {
            path: path.to_string(),
            action,
            object_id: commit.target,
            patch_id: commit.patch_id,
        }),
        Err(err) => {
            warn!(path, %action, error = %err, "Sync item failed");
            report.failed.push(SyncFailure {
                path: path.to_string(),
                action,
                error: err.to_string(),
            });
        }
    }
}

struct Syncer<'a> {
    session: &'a mut Session,
    source: &'a SourceRecord,
    adapter: &'a dyn SourceAdapter,
    processor: &'a dyn ContentProcessor,
}

impl Syncer<'_> {
    fn add(&mut self, entry: &FileEntry) -> StrataResult<CommitReport> {
        let bytes = self.adapter.read_file(&entry.rel_path)?;
        let payload = self.processor.process(entry, &bytes)?;
        let request = PatchRequest::create(payload);
        let upsert = self.index_upsert(entry, &request.target);
        self.commit(request, vec![upsert])
    }

    fn modify(&mut self, change: &Modified) -> StrataResult<CommitReport> {
        let entry = &change.entry;
        let bytes = self.adapter.read_file(&entry.rel_path)?;
        let payload = self.processor.process(entry, &bytes)?;
        let changes = as_changes(payload.to_content());
        let upsert = self.index_upsert(entry, &change.object_id);

        let request = PatchRequest::update(&change.object_id, changes);
        match commit_with_index(self.session, request, vec![upsert.clone()])? {
            CommitOutcome::Committed(report) => Ok(report),
            CommitOutcome::Skipped { reason, .. } => {
                debug!(
                    path = %entry.rel_path,
                    object = %short_id(&change.object_id),
                    %reason,
                    "Object gone, re-adding"
                );
                self.commit(PatchRequest::add(&change.object_id, payload), vec![upsert])
            }
        }
    }

    fn rename(&mut self, change: &Renamed) -> StrataResult<CommitReport> {
        let entry = &change.entry;
        // Path-derived fields (a note's fallback title, a file's name) must
        // follow the new path.
        let bytes = self.adapter.read_file(&entry.rel_path)?;
        let payload = self.processor.process(entry, &bytes)?;
        let mut changes = as_changes(payload.to_content());
        changes.insert("path".to_string(), Value::String(change.new_path.clone()));
        let writes = vec![
            PathIndexWrite::Remove {
                source_id: self.source.id.clone(),
                path: change.old_path.clone(),
            },
            self.index_upsert(entry, &change.object_id),
        ];

        let request = PatchRequest::update(&change.object_id, changes);
        match commit_with_index(self.session, request, writes.clone())? {
            CommitOutcome::Committed(report) => Ok(report),
            CommitOutcome::Skipped { reason, .. } => {
                debug!(
                    path = %change.new_path,
                    object = %short_id(&change.object_id),
                    %reason,
                    "Renamed object gone, re-adding"
                );
                self.commit(PatchRequest::add(&change.object_id, payload), writes)
            }
        }
    }

    fn delete(&mut self, entry: &PathIndexEntry) -> StrataResult<CommitReport> {
        let remove = PathIndexWrite::Remove {
            source_id: self.source.id.clone(),
            path: entry.path.clone(),
        };
        self.commit(PatchRequest::delete(&entry.object_id), vec![remove])
    }

    fn commit(
        &mut self,
        request: PatchRequest,
        writes: Vec<PathIndexWrite>,
    ) -> StrataResult<CommitReport> {
        let target = request.target.clone();
        match commit_with_index(self.session, request, writes)? {
            CommitOutcome::Committed(report) => Ok(report),
            CommitOutcome::Skipped { reason, .. } => Err(StrataError::validation(format!(
                "patch on `{}` was skipped: {reason}",
                short_id(&target)
            ))),
        }
    }

    fn index_upsert(&self, entry: &FileEntry, object_id: &str) -> PathIndexWrite {
        PathIndexWrite::Upsert(PathIndexEntry {
            source_id: self.source.id.clone(),
            path: entry.rel_path.clone(),
            content_id: entry.content_id.clone(),
            object_id: object_id.to_string(),
            object_type: entry.kind.object_type().to_string(),
            size: entry.size,
            mtime: entry.mtime,
            tracked_at: now_millis(),
        })
    }
}

fn as_changes(content: Value) -> Map<String, Value> {
    match content {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
