//! Change detection between a scan and a source's path index.
//!
//! Renames are inferred purely from content addresses: a deleted path and an
//! added path with the same content address are paired as one rename. When
//! several deleted paths share a content address they are paired in path
//! order.
//!
//! This means two unrelated files with byte-identical content can be paired
//! as a rename of each other. That is the accepted trade-off of hash-only
//! rename inference; no path-similarity heuristics are applied.
//!
//! A file the scan saw but could not hash (too large, unreadable) is never
//! reported as deleted. It is listed in [`ChangeSet::unscanned`] instead and
//! its index entry stays as it was.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use strata_db::PathIndexEntry;

use crate::scanner::{FileEntry, SkippedFile, SkippedReason};

/// A path whose content changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modified {
    pub entry: FileEntry,
    pub old_content_id: String,
    pub new_content_id: String,
    /// Object the path was materialized into.
    pub object_id: String,
}

/// A path that moved with unchanged content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Renamed {
    pub old_path: String,
    pub new_path: String,
    pub content_id: String,
    pub entry: FileEntry,
    pub object_id: String,
}

/// A file that exists but could not be compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unscanned {
    pub path: String,
    pub reason: SkippedReason,
    /// Object the path is materialized into, if it was tracked.
    pub object_id: Option<String>,
}

/// Differences between a scan and the recorded path index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Paths only in the scan.
    pub added: Vec<FileEntry>,
    /// Paths in both with different content.
    pub modified: Vec<Modified>,
    /// Paths only in the index.
    pub deleted: Vec<PathIndexEntry>,
    /// Deleted/added pairs sharing a content address.
    pub renamed: Vec<Renamed>,
    /// Tracked files the scan skipped, and untracked ones it could not read.
    /// These are not changes and do not count towards [`ChangeSet::len`].
    pub unscanned: Vec<Unscanned>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }

    /// Total number of changes.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len() + self.renamed.len()
    }
}

/// Compare a scan against the previously recorded path index.
///
/// All output lists are sorted by path (renames by new path). `skipped`
/// holds the files the scan found but left out; untracked oversized files
/// among them are dropped silently.
pub fn detect_changes(
    scan: &[FileEntry],
    skipped: &[SkippedFile],
    index: &[PathIndexEntry],
) -> ChangeSet {
    let old_by_path: BTreeMap<&str, &PathIndexEntry> =
        index.iter().map(|e| (e.path.as_str(), e)).collect();
    let new_by_path: BTreeMap<&str, &FileEntry> =
        scan.iter().map(|e| (e.rel_path.as_str(), e)).collect();
    let present: HashSet<&str> = skipped.iter().map(|s| s.rel_path.as_str()).collect();

    let mut unscanned: Vec<Unscanned> = skipped
        .iter()
        .filter_map(|file| {
            let tracked = old_by_path.get(file.rel_path.as_str());
            let unreadable = matches!(file.reason, SkippedReason::Unreadable { .. });
            (tracked.is_some() || unreadable).then(|| Unscanned {
                path: file.rel_path.clone(),
                reason: file.reason.clone(),
                object_id: tracked.map(|old| old.object_id.clone()),
            })
        })
        .collect();
    unscanned.sort_by(|a, b| a.path.cmp(&b.path));

    let mut added: Vec<&FileEntry> = Vec::new();
    let mut modified = Vec::new();

    for (path, entry) in &new_by_path {
        match old_by_path.get(path) {
            None => added.push(*entry),
            Some(old) if old.content_id != entry.content_id => modified.push(Modified {
                entry: (*entry).clone(),
                old_content_id: old.content_id.clone(),
                new_content_id: entry.content_id.clone(),
                object_id: old.object_id.clone(),
            }),
            Some(_) => {}
        }
    }

    // Deletion candidates grouped by content address, in path order.
    let mut candidates: HashMap<&str, VecDeque<&PathIndexEntry>> = HashMap::new();
    for (path, old) in &old_by_path {
        if !new_by_path.contains_key(path) && !present.contains(path) {
            candidates
                .entry(old.content_id.as_str())
                .or_default()
                .push_back(*old);
        }
    }

    let mut renamed = Vec::new();
    let mut still_added = Vec::new();
    for entry in added {
        let paired = candidates
            .get_mut(entry.content_id.as_str())
            .and_then(|queue| queue.pop_front());
        match paired {
            Some(old) => renamed.push(Renamed {
                old_path: old.path.clone(),
                new_path: entry.rel_path.clone(),
                content_id: entry.content_id.clone(),
                entry: entry.clone(),
                object_id: old.object_id.clone(),
            }),
            None => still_added.push(entry.clone()),
        }
    }

    let mut deleted: Vec<PathIndexEntry> = candidates
        .into_values()
        .flatten()
        .cloned()
        .collect();
    deleted.sort_by(|a, b| a.path.cmp(&b.path));

    ChangeSet {
        added: still_added,
        modified,
        deleted,
        renamed,
        unscanned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use crate::scanner::FileKind;
    use chrono::Utc;
    use std::path::PathBuf;

    fn file(path: &str, content: &str) -> FileEntry {
        FileEntry {
            rel_path: path.to_string(),
            abs_path: PathBuf::from("/src").join(path),
            kind: FileKind::Note,
            content_id: hash_bytes(content.as_bytes()),
            size: content.len() as u64,
            mtime: 0,
        }
    }

    fn tracked(path: &str, content: &str) -> PathIndexEntry {
        PathIndexEntry {
            source_id: "s".to_string(),
            path: path.to_string(),
            content_id: hash_bytes(content.as_bytes()),
            object_id: format!("obj-{path}"),
            object_type: "note".to_string(),
            size: content.len() as u64,
            mtime: 0,
            tracked_at: Utc::now(),
        }
    }

    #[test]
    fn test_moved_file_is_exactly_one_rename() {
        let changes = detect_changes(&[file("b/a.md", "H")], &[], &[tracked("a.md", "H")]);

        assert_eq!(changes.renamed.len(), 1);
        assert_eq!(changes.renamed[0].old_path, "a.md");
        assert_eq!(changes.renamed[0].new_path, "b/a.md");
        assert_eq!(changes.renamed[0].object_id, "obj-a.md");
        assert!(changes.added.is_empty());
        assert!(changes.deleted.is_empty());
        assert!(changes.modified.is_empty());
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_added_modified_deleted() {
        let scan = [file("new.md", "n"), file("same.md", "s"), file("edit.md", "v2")];
        let index = [tracked("same.md", "s"), tracked("edit.md", "v1"), tracked("gone.md", "g")];

        let changes = detect_changes(&scan, &[], &index);

        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].rel_path, "new.md");
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].entry.rel_path, "edit.md");
        assert_eq!(changes.modified[0].old_content_id, hash_bytes(b"v1"));
        assert_eq!(changes.modified[0].object_id, "obj-edit.md");
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].path, "gone.md");
        assert!(changes.renamed.is_empty());
    }

    #[test]
    fn test_identical_content_pairs_in_path_order() {
        // Known limitation: unrelated byte-identical files pair as renames.
        let scan = [file("z.md", "same")];
        let index = [tracked("b.md", "same"), tracked("a.md", "same")];

        let changes = detect_changes(&scan, &[], &index);

        assert_eq!(changes.renamed.len(), 1);
        assert_eq!(changes.renamed[0].old_path, "a.md");
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].path, "b.md");
    }

    #[test]
    fn test_skipped_files_are_not_deleted() {
        let index = [tracked("big.md", "v1"), tracked("locked.md", "l"), tracked("gone.md", "g")];
        let skipped = [
            SkippedFile {
                rel_path: "big.md".to_string(),
                kind: FileKind::Note,
                reason: SkippedReason::TooLarge { size: 4096, limit: 1024 },
            },
            SkippedFile {
                rel_path: "locked.md".to_string(),
                kind: FileKind::Note,
                reason: SkippedReason::Unreadable {
                    error: "permission denied".to_string(),
                },
            },
            SkippedFile {
                rel_path: "huge-new.md".to_string(),
                kind: FileKind::Note,
                reason: SkippedReason::TooLarge { size: 4096, limit: 1024 },
            },
        ];

        let changes = detect_changes(&[], &skipped, &index);

        let deleted: Vec<_> = changes.deleted.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(deleted, vec!["gone.md"]);
        assert_eq!(changes.len(), 1);

        // Untracked oversized files are not reported.
        let unscanned: Vec<_> = changes.unscanned.iter().map(|u| u.path.as_str()).collect();
        assert_eq!(unscanned, vec!["big.md", "locked.md"]);
        assert_eq!(changes.unscanned[0].object_id.as_deref(), Some("obj-big.md"));
    }

    #[test]
    fn test_skipped_file_is_not_a_rename_source() {
        // Same content moved elsewhere while the old path is unreadable.
        let skipped = [SkippedFile {
            rel_path: "a.md".to_string(),
            kind: FileKind::Note,
            reason: SkippedReason::Unreadable {
                error: "busy".to_string(),
            },
        }];
        let changes = detect_changes(&[file("copy.md", "H")], &skipped, &[tracked("a.md", "H")]);

        assert!(changes.renamed.is_empty());
        assert_eq!(changes.added.len(), 1);
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_no_changes() {
        let changes = detect_changes(&[file("a.md", "x")], &[], &[tracked("a.md", "x")]);
        assert!(changes.is_empty());
        assert_eq!(changes, ChangeSet::default());
    }
}
