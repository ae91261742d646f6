//! Committing patches and reading the patch log.
//!
//! Each view's history is a parent-linked chain of patch objects. The chain
//! lives in the object table (keyed by content address) and each view only
//! stores its HEAD id.
//!
//! ## Commit
//!
//! A commit reads the active view's HEAD, builds the patch with
//! `parentId = HEAD`, plans its projection writes against the current
//! projection and hands everything to the store as one [`CommitBatch`]. The
//! store applies the batch in a single transaction, so HEAD never points at
//! a patch whose projection effect is missing.
//!
//! ## Replay
//!
//! The projection is a cache. [`rebuild_projection`] replays every patch in
//! the object table ordered by creation time, then insertion sequence, and
//! swaps the result in atomically.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use strata_db::{CommitBatch, PathIndexWrite};
use tracing::{debug, info, warn};

use crate::errors::{EntityKind, StrataError, StrataResult};
use crate::hash::{now_millis, short_id};
use crate::object::Object;
use crate::patch::{PatchOpKind, PatchRecord, PatchRequest};
use crate::payload::ObjectType;
use crate::projection::{plan, ApplyMode, Plan, Projection, ProjectionEffect, SkipReason};
use crate::session::Session;

/// Minimum length of an id prefix accepted by [`resolve_ref`].
pub const MIN_PREFIX_LEN: usize = 6;

// ============================================================================
// Commit
// ============================================================================

/// A committed patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    /// Id of the new patch (the new HEAD).
    pub patch_id: String,

    /// Previous HEAD.
    pub parent_id: Option<String>,

    pub op: PatchOpKind,

    pub target: String,

    /// What the patch did to the projection.
    pub effect: ProjectionEffect,

    pub created_at: DateTime<Utc>,
}

/// Result of [`commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The patch was persisted and HEAD advanced.
    Committed(CommitReport),
    /// The patch would have had no effect; nothing was written.
    Skipped { target: String, reason: SkipReason },
}

impl CommitOutcome {
    /// The report, if the patch was committed.
    pub fn committed(&self) -> Option<&CommitReport> {
        match self {
            Self::Committed(report) => Some(report),
            Self::Skipped { .. } => None,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Commit a patch to the session's active view.
///
/// # Errors
///
/// - [`StrataError::Duplicate`] if an `add` targets a live object; nothing is
///   written and HEAD does not move.
/// - [`StrataError::Db`] if the store fails or the view HEAD moved
///   concurrently.
pub fn commit(session: &mut Session, request: PatchRequest) -> StrataResult<CommitOutcome> {
    commit_with_index(session, request, Vec::new())
}

/// Commit a patch together with path-index writes, atomically.
pub(crate) fn commit_with_index(
    session: &mut Session,
    request: PatchRequest,
    path_index: Vec<PathIndexWrite>,
) -> StrataResult<CommitOutcome> {
    let head = session.head()?;
    let created_at = commit_time(session)?;
    let (patch, objects) = request.into_patch(session.agent(), head.clone());

    let store = session.store();
    let planned = plan(&patch, created_at, ApplyMode::Commit, |id| {
        Ok(store.get_state_view_entry(id)?)
    })?;

    let (effect, projection) = match planned {
        Plan::Apply { effect, writes } => (effect, writes),
        Plan::Skip(reason) => {
            debug!(
                op = %patch.op.kind(),
                target = %short_id(&patch.target),
                %reason,
                "Patch skipped"
            );
            return Ok(CommitOutcome::Skipped {
                target: patch.target,
                reason,
            });
        }
    };

    let patch_object = Object::new(ObjectType::Patch, patch.to_content(), created_at);
    let batch = CommitBatch {
        view: session.view().to_string(),
        expected_head: head.clone(),
        patch: patch_object.to_record(),
        objects: objects.iter().map(Object::to_record).collect(),
        projection,
        path_index,
        mirror_legacy_head: session.view().is_default(),
    };
    let receipt = session.store_mut().commit_patch(&batch)?;

    info!(
        view = %session.view(),
        patch = %patch_object.short_id(),
        op = %patch.op.kind(),
        target = %short_id(&patch.target),
        projection_writes = receipt.projection_writes,
        "Committed patch"
    );

    Ok(CommitOutcome::Committed(CommitReport {
        patch_id: receipt.head_id,
        parent_id: receipt.parent_id,
        op: patch.op.kind(),
        target: patch.target,
        effect,
        created_at,
    }))
}

/// Timestamp for a new patch: now, but never earlier than the newest patch
/// in the store. Replay orders every view's patches by creation time, so a
/// commit must sort after everything the projection already reflects, the
/// parent included, even if the clock steps back.
fn commit_time(session: &Session) -> StrataResult<DateTime<Utc>> {
    let now = now_millis();
    let newest = session.store().get_all_patches(Some(1))?.into_iter().next();
    Ok(match newest {
        Some(record) => now.max(record.created_at),
        None => now,
    })
}

// ============================================================================
// Reading the log
// ============================================================================

/// All patches touching `target`, oldest first, across every view.
pub fn history(session: &Session, target: &str) -> StrataResult<Vec<PatchRecord>> {
    session
        .store()
        .get_patches_by_target(target)?
        .into_iter()
        .map(|record| PatchRecord::from_object(&Object::from(record)))
        .collect()
}

/// The active view's chain, newest first, walked from HEAD via `parentId`.
pub fn log(session: &Session, limit: Option<usize>) -> StrataResult<Vec<PatchRecord>> {
    match session.head()? {
        Some(head) => walk_chain(session, &head, limit),
        None => Ok(Vec::new()),
    }
}

/// Walk a chain from `start` towards the root, newest first.
fn walk_chain(session: &Session, start: &str, limit: Option<usize>) -> StrataResult<Vec<PatchRecord>> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(start.to_string());

    while let Some(id) = next {
        if limit.is_some_and(|limit| out.len() >= limit) {
            break;
        }
        if !seen.insert(id.clone()) {
            return Err(StrataError::validation(format!(
                "patch chain loops at {}",
                short_id(&id)
            )));
        }
        let object = session
            .store()
            .get_object(&id)?
            .map(Object::from)
            .ok_or_else(|| StrataError::not_found(EntityKind::Patch, id.as_str()))?;
        let record = PatchRecord::from_object(&object)?;
        next = record.patch.parent_id.clone();
        out.push(record);
    }

    Ok(out)
}

/// Resolve a patch reference to a full id.
///
/// Accepts `HEAD` / `@`, `HEAD~N` / `@~N`, a full id, or a unique id prefix
/// of at least [`MIN_PREFIX_LEN`] characters.
///
/// # Errors
///
/// - [`StrataError::NotFound`] if nothing matches or the chain is too short
/// - [`StrataError::Validation`] for a malformed `~N` or an ambiguous prefix
pub fn resolve_ref(session: &Session, reference: &str) -> StrataResult<String> {
    let reference = reference.trim();

    if reference.eq_ignore_ascii_case("HEAD") || reference == "@" {
        return session
            .head()?
            .ok_or_else(|| StrataError::not_found(EntityKind::Alias, reference));
    }

    if let Some(steps) = reference
        .strip_prefix("HEAD~")
        .or_else(|| reference.strip_prefix("@~"))
    {
        let n: usize = steps.parse().map_err(|_| {
            StrataError::validation(format!(
                "invalid ancestor syntax `{reference}`: expected a number after ~"
            ))
        })?;
        let head = session
            .head()?
            .ok_or_else(|| StrataError::not_found(EntityKind::Alias, reference))?;
        let limit = n
            .checked_add(1)
            .ok_or_else(|| StrataError::not_found(EntityKind::Alias, reference))?;
        let chain = walk_chain(session, &head, Some(limit))?;
        return chain
            .into_iter()
            .nth(n)
            .map(|record| record.id)
            .ok_or_else(|| StrataError::not_found(EntityKind::Alias, reference));
    }

    if let Some(object) = session.store().get_object(reference)? {
        if object.is_patch() {
            return Ok(object.id);
        }
    }

    if reference.len() >= MIN_PREFIX_LEN {
        let matches: Vec<String> = session
            .store()
            .get_patch_log()?
            .into_iter()
            .filter(|record| record.id.starts_with(reference))
            .map(|record| record.id)
            .collect();
        match matches.as_slice() {
            [] => {}
            [only] => return Ok(only.clone()),
            many => {
                return Err(StrataError::validation(format!(
                    "ambiguous patch prefix `{reference}`: matches {} patches",
                    many.len()
                )));
            }
        }
    }

    Err(StrataError::not_found(EntityKind::Alias, reference))
}

// ============================================================================
// Replay
// ============================================================================

/// Outcome of [`rebuild_projection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Patches replayed.
    pub replayed: usize,
    /// Patches that could not be decoded and were left out.
    pub unreadable: usize,
    /// Entries in the rebuilt projection, tombstones included.
    pub entries: usize,
}

/// Rebuild the projection from the full patch log and swap it in.
pub fn rebuild_projection(session: &mut Session) -> StrataResult<RebuildReport> {
    let mut projection = Projection::new();
    let mut report = RebuildReport::default();

    for record in session.store().get_patch_log()? {
        let object = Object::from(record);
        match PatchRecord::from_object(&object) {
            Ok(patch) => {
                projection.apply(&patch.patch, patch.created_at)?;
                report.replayed += 1;
            }
            Err(err) => {
                warn!(patch = %object.short_id(), error = %err, "Skipping unreadable patch");
                report.unreadable += 1;
            }
        }
    }

    let entries = projection.into_entries();
    report.entries = entries.len();
    session.store_mut().replace_state_view(&entries)?;

    info!(
        replayed = report.replayed,
        unreadable = report.unreadable,
        entries = report.entries,
        "Rebuilt projection"
    );
    Ok(report)
}

/// Reconstruct the projection as of `patch_id` by replaying its ancestor
/// chain only.
///
/// # Errors
///
/// Returns [`StrataError::NotFound`] if the patch or one of its ancestors is
/// missing.
pub fn snapshot_at(session: &Session, patch_id: &str) -> StrataResult<Projection> {
    let mut chain = walk_chain(session, patch_id, None)?;
    chain.reverse();

    let mut projection = Projection::new();
    for record in &chain {
        projection.apply(&record.patch, record.created_at)?;
    }
    debug!(patch = %short_id(patch_id), patches = chain.len(), "Reconstructed snapshot");
    Ok(projection)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{Patch, PatchOp};
    use crate::payload::{NotePayload, Payload, RelationPayload};
    use serde_json::{json, Map, Value};

    fn note(title: &str) -> Payload {
        Payload::Note(NotePayload {
            title: title.to_string(),
            body: String::new(),
            path: None,
            extra: Map::new(),
        })
    }

    fn changes(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn committed(outcome: CommitOutcome) -> CommitReport {
        match outcome {
            CommitOutcome::Committed(report) => report,
            other => panic!("expected commit, got {other:?}"),
        }
    }

    #[test]
    fn test_commit_chain_is_monotonic() {
        let mut session = Session::in_memory().unwrap();
        let mut ids = Vec::new();
        for i in 0..5 {
            let report = committed(commit(&mut session, PatchRequest::create(note(&format!("n{i}")))).unwrap());
            ids.push(report.patch_id);
        }

        assert_eq!(session.head().unwrap().as_deref(), Some(ids[4].as_str()));

        let chain = log(&session, None).unwrap();
        assert_eq!(chain.len(), 5);
        assert_eq!(chain[0].id, ids[4]);
        assert_eq!(chain[4].patch.parent_id, None);
        for k in 1..5 {
            let record = chain.iter().find(|r| r.id == ids[k]).unwrap();
            assert_eq!(record.patch.parent_id.as_deref(), Some(ids[k - 1].as_str()));
        }

        assert_eq!(log(&session, Some(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_default_view_mirrors_legacy_head() {
        let mut session = Session::in_memory().unwrap();
        let report = committed(commit(&mut session, PatchRequest::create(note("a"))).unwrap());
        assert_eq!(
            session.store().get_config("head").unwrap(),
            Some(report.patch_id)
        );
    }

    #[test]
    fn test_add_over_live_target_leaves_head_unchanged() {
        let mut session = Session::in_memory().unwrap();
        let first = committed(commit(&mut session, PatchRequest::create(note("a"))).unwrap());

        let err = commit(&mut session, PatchRequest::add(first.target.clone(), note("b"))).unwrap_err();
        assert!(matches!(err, StrataError::Duplicate { kind: EntityKind::Object, .. }));
        assert_eq!(session.head().unwrap(), Some(first.patch_id));
        assert_eq!(session.current(&first.target).unwrap().content["title"], "a");
    }

    #[test]
    fn test_update_on_missing_target_is_skipped() {
        let mut session = Session::in_memory().unwrap();
        let outcome = commit(&mut session, PatchRequest::update("ghost", changes(json!({"a": 1})))).unwrap();

        assert_eq!(
            outcome,
            CommitOutcome::Skipped {
                target: "ghost".to_string(),
                reason: SkipReason::TargetMissing
            }
        );
        assert_eq!(session.head().unwrap(), None);
    }

    #[test]
    fn test_update_merge_and_history() {
        let mut session = Session::in_memory().unwrap();
        let add = committed(commit(&mut session, PatchRequest::create(note("t"))).unwrap());
        let target = add.target.clone();

        commit(&mut session, PatchRequest::update(target.clone(), changes(json!({"a": 1})))).unwrap();
        commit(&mut session, PatchRequest::update(target.clone(), changes(json!({"b": 2})))).unwrap();

        let current = session.current(&target).unwrap();
        assert_eq!(current.content, json!({"title": "t", "body": "", "a": 1, "b": 2}));

        let ops: Vec<_> = history(&session, &target)
            .unwrap()
            .into_iter()
            .map(|r| r.patch.op.kind())
            .collect();
        assert_eq!(ops, vec![PatchOpKind::Add, PatchOpKind::Update, PatchOpKind::Update]);
    }

    #[test]
    fn test_delete_twice_and_unknown() {
        let mut session = Session::in_memory().unwrap();
        let add = committed(commit(&mut session, PatchRequest::create(note("t"))).unwrap());

        for _ in 0..2 {
            let report = committed(commit(&mut session, PatchRequest::delete(add.target.clone())).unwrap());
            assert_eq!(report.effect, ProjectionEffect::Tombstoned);
            let entry = session.store().get_state_view_entry(&add.target).unwrap().unwrap();
            assert!(entry.is_deleted);
        }

        let report = committed(commit(&mut session, PatchRequest::delete("never-added")).unwrap());
        assert_eq!(report.effect, ProjectionEffect::Unchanged);
        assert_eq!(log(&session, None).unwrap().len(), 4);
    }

    #[test]
    fn test_resurrect_after_delete() {
        let mut session = Session::in_memory().unwrap();
        let add = committed(commit(&mut session, PatchRequest::create(note("t"))).unwrap());
        commit(&mut session, PatchRequest::delete(add.target.clone())).unwrap();

        let report = committed(commit(&mut session, PatchRequest::add(add.target.clone(), note("back"))).unwrap());
        assert_eq!(report.effect, ProjectionEffect::Resurrected);
        assert_eq!(session.current(&add.target).unwrap().content["title"], "back");
    }

    #[test]
    fn test_link_and_merge() {
        let mut session = Session::in_memory().unwrap();
        let a = committed(commit(&mut session, PatchRequest::create(note("a"))).unwrap());
        let b = committed(commit(&mut session, PatchRequest::create(note("b"))).unwrap());

        let link = committed(
            commit(&mut session, PatchRequest::link(RelationPayload::new(&a.target, &b.target, "references")))
                .unwrap(),
        );
        assert_eq!(link.effect, ProjectionEffect::Linked);
        assert_eq!(session.current(&link.target).unwrap().object_type, "relation");

        let noop = committed(commit(&mut session, PatchRequest::link_at("r", None)).unwrap());
        assert_eq!(noop.effect, ProjectionEffect::Unchanged);

        let merged = committed(
            commit(&mut session, PatchRequest::merge("c", vec![a.target.clone(), b.target.clone()])).unwrap(),
        );
        assert_eq!(merged.effect, ProjectionEffect::Merged { tombstoned: 2 });
        assert!(session.current(&a.target).is_err());
        assert!(session.current("c").is_err());
    }

    #[test]
    fn test_views_have_independent_chains() {
        let mut session = Session::in_memory().unwrap();
        let on_main = committed(commit(&mut session, PatchRequest::create(note("m"))).unwrap());

        session.create_view("draft").unwrap();
        session.switch_view("draft").unwrap();
        let on_draft = committed(commit(&mut session, PatchRequest::create(note("d"))).unwrap());

        assert_eq!(on_draft.parent_id, None);
        assert_eq!(log(&session, None).unwrap().len(), 1);
        // Only the default view writes the legacy key.
        assert_eq!(session.store().get_config("head").unwrap(), Some(on_main.patch_id.clone()));

        session.switch_view("main").unwrap();
        assert_eq!(session.head().unwrap(), Some(on_main.patch_id));
    }

    #[test]
    fn test_rebuild_matches_incremental_projection() {
        let mut session = Session::in_memory().unwrap();
        let a = committed(commit(&mut session, PatchRequest::create(note("a"))).unwrap());
        let b = committed(commit(&mut session, PatchRequest::create(note("b"))).unwrap());
        commit(&mut session, PatchRequest::update(a.target.clone(), changes(json!({"x": [1, 2]})))).unwrap();
        commit(&mut session, PatchRequest::delete(b.target.clone())).unwrap();
        commit(&mut session, PatchRequest::link(RelationPayload::new(&a.target, &b.target, "refs"))).unwrap();

        let before = session.store().get_all_state_view_objects(None, true).unwrap();
        let report = rebuild_projection(&mut session).unwrap();
        let after = session.store().get_all_state_view_objects(None, true).unwrap();

        assert_eq!(report.replayed, 5);
        assert_eq!(report.unreadable, 0);
        assert_eq!(before, after);
    }

    #[test]
    fn test_rebuild_keeps_non_canonical_add_content() {
        let mut session = Session::in_memory().unwrap();
        let sparse = Payload::Opaque {
            object_type: ObjectType::Note,
            content: json!({"title": "t"}),
        };
        let null_path = Payload::Opaque {
            object_type: ObjectType::Note,
            content: json!({"title": "p", "body": "", "path": null}),
        };
        let a = committed(commit(&mut session, PatchRequest::create(sparse)).unwrap());
        let b = committed(commit(&mut session, PatchRequest::create(null_path)).unwrap());
        commit(&mut session, PatchRequest::delete(b.target.clone())).unwrap();
        commit(&mut session, PatchRequest::add(b.target.clone(), Payload::Opaque {
            object_type: ObjectType::Note,
            content: json!({"title": "p2", "path": null}),
        }))
        .unwrap();

        let before = session.store().get_all_state_view_objects(None, true).unwrap();
        rebuild_projection(&mut session).unwrap();
        let after = session.store().get_all_state_view_objects(None, true).unwrap();

        assert_eq!(before, after);
        assert_eq!(session.current(&a.target).unwrap().content, json!({"title": "t"}));
        assert_eq!(
            session.current(&b.target).unwrap().content,
            json!({"title": "p2", "path": null})
        );
    }

    #[test]
    fn test_commit_sorts_after_newest_patch_in_store() {
        let mut session = Session::in_memory().unwrap();
        let add = committed(commit(&mut session, PatchRequest::create(note("t"))).unwrap());

        // A patch written by a writer whose clock runs an hour ahead.
        let ahead = now_millis() + chrono::Duration::hours(1);
        let foreign = Patch {
            op: PatchOp::Update {
                changes: changes(json!({"x": 1})),
            },
            target: add.target.clone(),
            agent: "elsewhere".to_string(),
            parent_id: None,
            confidence: None,
            evidence: None,
            note: None,
        };
        let foreign = Object::new(ObjectType::Patch, foreign.to_content(), ahead);
        session.store_mut().insert_object(&foreign.to_record()).unwrap();

        let update = committed(
            commit(&mut session, PatchRequest::update(add.target.clone(), changes(json!({"x": 2})))).unwrap(),
        );
        assert!(update.created_at >= ahead);

        let before = session.store().get_all_state_view_objects(None, true).unwrap();
        rebuild_projection(&mut session).unwrap();
        let after = session.store().get_all_state_view_objects(None, true).unwrap();
        assert_eq!(before, after);
        assert_eq!(session.current(&add.target).unwrap().content["x"], 2);
    }

    #[test]
    fn test_snapshot_at_earlier_patch() {
        let mut session = Session::in_memory().unwrap();
        let add = committed(commit(&mut session, PatchRequest::create(note("t"))).unwrap());
        let update = committed(
            commit(&mut session, PatchRequest::update(add.target.clone(), changes(json!({"a": 1})))).unwrap(),
        );
        commit(&mut session, PatchRequest::delete(add.target.clone())).unwrap();

        let at_add = snapshot_at(&session, &add.patch_id).unwrap();
        assert_eq!(at_add.get(&add.target).unwrap().content["title"], "t");
        assert!(at_add.get(&add.target).unwrap().content.get("a").is_none());

        let at_update = snapshot_at(&session, &update.patch_id).unwrap();
        assert_eq!(at_update.get(&add.target).unwrap().content["a"], 1);

        let head = session.head().unwrap().unwrap();
        assert!(snapshot_at(&session, &head).unwrap().get(&add.target).unwrap().is_deleted);
    }

    #[test]
    fn test_resolve_ref() {
        let mut session = Session::in_memory().unwrap();
        assert!(resolve_ref(&session, "HEAD").unwrap_err().is_not_found());

        let first = committed(commit(&mut session, PatchRequest::create(note("a"))).unwrap());
        let second = committed(commit(&mut session, PatchRequest::create(note("b"))).unwrap());

        assert_eq!(resolve_ref(&session, "HEAD").unwrap(), second.patch_id);
        assert_eq!(resolve_ref(&session, "@").unwrap(), second.patch_id);
        assert_eq!(resolve_ref(&session, "HEAD~1").unwrap(), first.patch_id);
        assert!(resolve_ref(&session, "HEAD~2").unwrap_err().is_not_found());
        assert!(matches!(resolve_ref(&session, "HEAD~x"), Err(StrataError::Validation(_))));
        let max = format!("HEAD~{}", usize::MAX);
        assert!(resolve_ref(&session, &max).unwrap_err().is_not_found());
        assert!(resolve_ref(&session, &format!("@~{}", usize::MAX)).unwrap_err().is_not_found());

        assert_eq!(resolve_ref(&session, &first.patch_id).unwrap(), first.patch_id);
        assert_eq!(resolve_ref(&session, &first.patch_id[..10]).unwrap(), first.patch_id);
        assert!(resolve_ref(&session, &first.patch_id[..4]).unwrap_err().is_not_found());
        // An object id that is not a patch does not resolve.
        assert!(resolve_ref(&session, &first.target).unwrap_err().is_not_found());
    }
}
