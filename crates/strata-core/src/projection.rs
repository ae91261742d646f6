//! Applying patches to the state-view projection.
//!
//! Planning is pure: given a patch and a way to read current entries, it
//! returns the entries to write. The patch manager feeds it the store (and
//! commits the result in one batch); replay feeds it an in-memory
//! [`Projection`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use strata_db::StateViewEntry;
use tracing::warn;

use crate::errors::{EntityKind, StrataError, StrataResult};
use crate::hash::short_id;
use crate::patch::{Patch, PatchOp};
use crate::payload::Payload;

/// How strictly to apply a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// A new commit: `add` over a live target is rejected.
    Commit,
    /// Replaying the log: the log is authoritative, so `add` over a live
    /// target overwrites.
    Replay,
}

/// What a patch did to the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionEffect {
    /// A new live entry.
    Created,
    /// A tombstoned entry came back.
    Resurrected,
    /// Fields were merged into a live entry.
    Updated,
    /// The target was tombstoned.
    Tombstoned,
    /// A relation entry was written.
    Linked,
    /// Merge sources were tombstoned.
    Merged { tombstoned: usize },
    /// Nothing changed (unknown delete target, link without relation).
    Unchanged,
}

/// Why a patch was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No entry exists for the target.
    TargetMissing,
    /// The target is tombstoned.
    TargetDeleted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TargetMissing => f.write_str("target does not exist"),
            Self::TargetDeleted => f.write_str("target is deleted"),
        }
    }
}

/// Result of planning one patch.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Write these entries.
    Apply {
        effect: ProjectionEffect,
        writes: Vec<StateViewEntry>,
    },
    /// The patch has no effect and should not be committed.
    Skip(SkipReason),
}

/// Plan the projection writes for `patch` at time `at`.
///
/// `lookup` returns the current entry for an id, tombstones included.
///
/// # Errors
///
/// In [`ApplyMode::Commit`], an `add` over a live target fails with
/// [`StrataError::Duplicate`]. Lookup errors are propagated.
pub fn plan<F>(patch: &Patch, at: DateTime<Utc>, mode: ApplyMode, mut lookup: F) -> StrataResult<Plan>
where
    F: FnMut(&str) -> StrataResult<Option<StateViewEntry>>,
{
    let target = patch.target.as_str();
    match &patch.op {
        PatchOp::Add { payload } => {
            let effect = match lookup(target)? {
                None => ProjectionEffect::Created,
                Some(existing) if existing.is_deleted => ProjectionEffect::Resurrected,
                Some(_) => match mode {
                    ApplyMode::Commit => {
                        return Err(StrataError::duplicate(EntityKind::Object, target));
                    }
                    ApplyMode::Replay => {
                        warn!(target = %short_id(target), "Replayed add overwrites a live entry");
                        ProjectionEffect::Created
                    }
                },
            };
            Ok(Plan::Apply {
                effect,
                writes: vec![live_entry(target, payload, at)],
            })
        }
        PatchOp::Update { changes } => {
            let Some(mut entry) = lookup(target)? else {
                return Ok(Plan::Skip(SkipReason::TargetMissing));
            };
            if entry.is_deleted {
                return Ok(Plan::Skip(SkipReason::TargetDeleted));
            }
            let mut content = match entry.content {
                Value::Object(map) => map,
                // Non-object content cannot take fields; the changes replace it.
                _ => serde_json::Map::new(),
            };
            for (key, value) in changes {
                content.insert(key.clone(), value.clone());
            }
            entry.content = Value::Object(content);
            entry.updated_at = at;
            Ok(Plan::Apply {
                effect: ProjectionEffect::Updated,
                writes: vec![entry],
            })
        }
        PatchOp::Delete => match lookup(target)? {
            Some(entry) => Ok(Plan::Apply {
                effect: ProjectionEffect::Tombstoned,
                writes: vec![tombstone(entry, at)],
            }),
            None => Ok(Plan::Apply {
                effect: ProjectionEffect::Unchanged,
                writes: Vec::new(),
            }),
        },
        PatchOp::Link { relation } => match relation {
            Some(relation) => Ok(Plan::Apply {
                effect: ProjectionEffect::Linked,
                writes: vec![live_entry(target, &Payload::Relation(relation.clone()), at)],
            }),
            None => Ok(Plan::Apply {
                effect: ProjectionEffect::Unchanged,
                writes: Vec::new(),
            }),
        },
        PatchOp::Merge { sources } => {
            let mut seen = BTreeSet::new();
            let mut writes = Vec::new();
            for source in sources {
                if !seen.insert(source.as_str()) {
                    continue;
                }
                if let Some(entry) = lookup(source.as_str())? {
                    if !entry.is_deleted {
                        writes.push(tombstone(entry, at));
                    }
                }
            }
            Ok(Plan::Apply {
                effect: ProjectionEffect::Merged {
                    tombstoned: writes.len(),
                },
                writes,
            })
        }
    }
}

fn live_entry(target: &str, payload: &Payload, at: DateTime<Utc>) -> StateViewEntry {
    StateViewEntry {
        object_id: target.to_string(),
        object_type: payload.object_type().to_string(),
        content: payload.to_content(),
        is_deleted: false,
        updated_at: at,
    }
}

fn tombstone(mut entry: StateViewEntry, at: DateTime<Utc>) -> StateViewEntry {
    entry.is_deleted = true;
    entry.updated_at = at;
    entry
}

// ============================================================================
// In-memory projection
// ============================================================================

/// A projection held in memory, used for replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    entries: BTreeMap<String, StateViewEntry>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one patch in replay mode. Patches that would be skipped on
    /// commit leave the projection untouched.
    pub fn apply(&mut self, patch: &Patch, at: DateTime<Utc>) -> StrataResult<Option<ProjectionEffect>> {
        let entries = &self.entries;
        let planned = plan(patch, at, ApplyMode::Replay, |id| Ok(entries.get(id).cloned()))?;
        match planned {
            Plan::Apply { effect, writes } => {
                for entry in writes {
                    self.entries.insert(entry.object_id.clone(), entry);
                }
                Ok(Some(effect))
            }
            Plan::Skip(_) => Ok(None),
        }
    }

    /// Entry for an id, tombstones included.
    pub fn get(&self, object_id: &str) -> Option<&StateViewEntry> {
        self.entries.get(object_id)
    }

    /// Number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entries ordered by id.
    pub fn live(&self) -> impl Iterator<Item = &StateViewEntry> {
        self.entries.values().filter(|entry| !entry.is_deleted)
    }

    /// All entries ordered by id.
    pub fn into_entries(self) -> Vec<StateViewEntry> {
        self.entries.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{NotePayload, RelationPayload};
    use serde_json::{json, Map};

    fn note(title: &str) -> Payload {
        Payload::Note(NotePayload {
            title: title.to_string(),
            body: String::new(),
            path: None,
            extra: Map::new(),
        })
    }

    fn patch(target: &str, op: PatchOp) -> Patch {
        Patch {
            op,
            target: target.to_string(),
            agent: "tester".to_string(),
            parent_id: None,
            confidence: None,
            evidence: None,
            note: None,
        }
    }

    fn changes(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_add_over_live_target_rejected_on_commit() {
        let existing = live_entry("x", &note("a"), Utc::now());
        let add = patch("x", PatchOp::Add { payload: note("b") });

        let err = plan(&add, Utc::now(), ApplyMode::Commit, |_| Ok(Some(existing.clone())))
            .unwrap_err();
        assert!(matches!(err, StrataError::Duplicate { kind: EntityKind::Object, .. }));

        let replayed = plan(&add, Utc::now(), ApplyMode::Replay, |_| Ok(Some(existing.clone())))
            .unwrap();
        assert!(matches!(replayed, Plan::Apply { effect: ProjectionEffect::Created, .. }));
    }

    #[test]
    fn test_add_over_tombstone_resurrects() {
        let dead = tombstone(live_entry("x", &note("a"), Utc::now()), Utc::now());
        let add = patch("x", PatchOp::Add { payload: note("b") });

        match plan(&add, Utc::now(), ApplyMode::Commit, |_| Ok(Some(dead.clone()))).unwrap() {
            Plan::Apply { effect, writes } => {
                assert_eq!(effect, ProjectionEffect::Resurrected);
                assert!(!writes[0].is_deleted);
                assert_eq!(writes[0].content["title"], "b");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_update_skips_missing_and_deleted() {
        let update = patch("x", PatchOp::Update { changes: changes(json!({"a": 1})) });

        assert_eq!(
            plan(&update, Utc::now(), ApplyMode::Commit, |_| Ok(None)).unwrap(),
            Plan::Skip(SkipReason::TargetMissing)
        );

        let dead = tombstone(live_entry("x", &note("a"), Utc::now()), Utc::now());
        assert_eq!(
            plan(&update, Utc::now(), ApplyMode::Commit, |_| Ok(Some(dead.clone()))).unwrap(),
            Plan::Skip(SkipReason::TargetDeleted)
        );
    }

    #[test]
    fn test_sequential_updates_merge_shallowly() {
        let mut projection = Projection::new();
        projection
            .apply(&patch("x", PatchOp::Add { payload: note("t") }), Utc::now())
            .unwrap();
        projection
            .apply(&patch("x", PatchOp::Update { changes: changes(json!({"a": 1})) }), Utc::now())
            .unwrap();
        projection
            .apply(&patch("x", PatchOp::Update { changes: changes(json!({"b": 2})) }), Utc::now())
            .unwrap();

        assert_eq!(
            projection.get("x").unwrap().content,
            json!({"title": "t", "body": "", "a": 1, "b": 2})
        );
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut projection = Projection::new();
        projection
            .apply(&patch("x", PatchOp::Add { payload: note("t") }), Utc::now())
            .unwrap();

        for _ in 0..2 {
            let effect = projection.apply(&patch("x", PatchOp::Delete), Utc::now()).unwrap();
            assert_eq!(effect, Some(ProjectionEffect::Tombstoned));
            assert!(projection.get("x").unwrap().is_deleted);
        }

        let effect = projection.apply(&patch("never", PatchOp::Delete), Utc::now()).unwrap();
        assert_eq!(effect, Some(ProjectionEffect::Unchanged));
        assert!(projection.get("never").is_none());
    }

    #[test]
    fn test_link_without_relation_is_noop() {
        let mut projection = Projection::new();
        let effect = projection
            .apply(&patch("r", PatchOp::Link { relation: None }), Utc::now())
            .unwrap();
        assert_eq!(effect, Some(ProjectionEffect::Unchanged));
        assert!(projection.is_empty());

        let relation = RelationPayload::new("a", "b", "references");
        projection
            .apply(&patch("r", PatchOp::Link { relation: Some(relation) }), Utc::now())
            .unwrap();
        assert_eq!(projection.get("r").unwrap().object_type, "relation");
    }

    #[test]
    fn test_merge_tombstones_sources_only() {
        let mut projection = Projection::new();
        for id in ["a", "b"] {
            projection
                .apply(&patch(id, PatchOp::Add { payload: note(id) }), Utc::now())
                .unwrap();
        }

        let merge = patch(
            "c",
            PatchOp::Merge {
                sources: vec!["a".to_string(), "b".to_string(), "a".to_string(), "zz".to_string()],
            },
        );
        let effect = projection.apply(&merge, Utc::now()).unwrap();

        assert_eq!(effect, Some(ProjectionEffect::Merged { tombstoned: 2 }));
        assert!(projection.get("a").unwrap().is_deleted);
        assert!(projection.get("b").unwrap().is_deleted);
        assert!(projection.get("c").is_none());
        assert_eq!(projection.live().count(), 0);
    }
}
