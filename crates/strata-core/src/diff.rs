//! State-to-state diffing.
//!
//! Compares two snapshots (object id → `{type, content}`) and reports added,
//! removed and modified objects. Modified objects carry one field change per
//! differing leaf, addressed by dotted path. Arrays are compared as whole
//! values. A type change is reported as a change at path `@type`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_db::StateViewEntry;

use crate::projection::Projection;

/// Path used for a change of object type.
pub const TYPE_PATH: &str = "@type";

/// One object in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub content: Value,
}

/// Live objects keyed by id.
pub type Snapshot = BTreeMap<String, SnapshotObject>;

/// Build a snapshot from projection entries, dropping tombstones.
pub fn snapshot_from_entries<'a, I>(entries: I) -> Snapshot
where
    I: IntoIterator<Item = &'a StateViewEntry>,
{
    entries
        .into_iter()
        .filter(|entry| !entry.is_deleted)
        .map(|entry| {
            (
                entry.object_id.clone(),
                SnapshotObject {
                    object_type: entry.object_type.clone(),
                    content: entry.content.clone(),
                },
            )
        })
        .collect()
}

/// Snapshot of the live entries of an in-memory projection.
pub fn snapshot_of(projection: &Projection) -> Snapshot {
    snapshot_from_entries(projection.live())
}

/// An object present on one side only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffObject {
    pub object_id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub content: Value,
}

/// A change at one leaf path. `None` means the path is absent on that side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// An object present on both sides with different type or content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedObject {
    pub object_id: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub changes: Vec<FieldChange>,
}

/// Result of [`diff_snapshots`], each list sorted by object id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<DiffObject>,
    pub removed: Vec<DiffObject>,
    pub modified: Vec<ModifiedObject>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Diff two snapshots.
pub fn diff_snapshots(old: &Snapshot, new: &Snapshot) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();

    for (id, after) in new {
        match old.get(id) {
            None => diff.added.push(DiffObject {
                object_id: id.clone(),
                object_type: after.object_type.clone(),
                content: after.content.clone(),
            }),
            Some(before) => {
                let mut changes = Vec::new();
                if before.object_type != after.object_type {
                    changes.push(FieldChange {
                        path: TYPE_PATH.to_string(),
                        old: Some(Value::String(before.object_type.clone())),
                        new: Some(Value::String(after.object_type.clone())),
                    });
                }
                diff_values("", Some(&before.content), Some(&after.content), &mut changes);
                if !changes.is_empty() {
                    diff.modified.push(ModifiedObject {
                        object_id: id.clone(),
                        object_type: after.object_type.clone(),
                        changes,
                    });
                }
            }
        }
    }

    for (id, before) in old {
        if !new.contains_key(id) {
            diff.removed.push(DiffObject {
                object_id: id.clone(),
                object_type: before.object_type.clone(),
                content: before.content.clone(),
            });
        }
    }

    diff
}

/// Structural equality. Object key order never matters; `null` and an
/// absent key are different.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| deep_equal(value, other)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| deep_equal(l, r))
        }
        _ => a == b,
    }
}

fn diff_values(path: &str, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<FieldChange>) {
    match (old, new) {
        (Some(Value::Object(before)), Some(Value::Object(after))) => {
            let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                diff_values(&child, before.get(key), after.get(key), out);
            }
        }
        (Some(before), Some(after)) if deep_equal(before, after) => {}
        (None, None) => {}
        _ => out.push(FieldChange {
            path: if path.is_empty() { "$".to_string() } else { path.to_string() },
            old: old.cloned(),
            new: new.cloned(),
        }),
    }
}
