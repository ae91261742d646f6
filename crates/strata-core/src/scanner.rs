//! Workspace scanning.
//!
//! Walks a source root, applies Strata's ignore rules, classifies files by
//! extension and hashes every tracked file. The walk itself is sequential;
//! hashing runs on the rayon pool and the output is sorted by path for
//! deterministic results.
//!
//! ## Ignore rules
//!
//! Rules come from, in order: the built-in set, the source's
//! `.strataignore`, then extra patterns from config. Each line is one
//! pattern; blank lines and `#` comments are skipped.
//!
//! - `*` and `?` match within a single path segment
//! - a trailing `/` only matches directories (and so everything below them)
//! - a pattern without `/` matches any single path component
//! - a pattern with `/` matches a root-anchored path prefix
//! - a leading `!` re-includes a previously ignored path
//!
//! Every ancestor prefix of a path is tested, and the last matching pattern
//! decides.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{is_file_extension, is_note_extension, BUILTIN_IGNORE_PATTERNS, IGNORE_FILENAME};
use crate::errors::{StrataError, StrataResult};
use crate::hash::hash_bytes;
use crate::payload::ObjectType;

// ============================================================================
// Ignore Rules
// ============================================================================

#[derive(Debug, Clone)]
struct IgnorePattern {
    /// Line as written, for diagnostics.
    raw: String,
    negated: bool,
    dir_only: bool,
    anchored: bool,
    regex: Regex,
}

impl IgnorePattern {
    fn parse(line: &str) -> StrataResult<Self> {
        let raw = line.trim();
        let mut body = raw;

        let negated = body.starts_with('!');
        if negated {
            body = &body[1..];
        }
        let dir_only = body.ends_with('/');
        if dir_only {
            body = &body[..body.len() - 1];
        }
        let leading_slash = body.starts_with('/');
        if leading_slash {
            body = &body[1..];
        }

        if body.is_empty() || body.contains("//") {
            return Err(StrataError::validation(format!(
                "malformed ignore pattern `{raw}`"
            )));
        }

        let anchored = leading_slash || body.contains('/');
        let regex = Regex::new(&glob_to_regex(body)).map_err(|e| {
            StrataError::validation(format!("malformed ignore pattern `{raw}`: {e}"))
        })?;

        Ok(Self {
            raw: raw.to_string(),
            negated,
            dir_only,
            anchored,
            regex,
        })
    }

    /// Whether the pattern matches one path prefix.
    fn matches(&self, prefix: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.anchored {
            self.regex.is_match(prefix)
        } else {
            let name = prefix.rsplit('/').next().unwrap_or(prefix);
            self.regex.is_match(name)
        }
    }
}

/// Compile a single-segment glob into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// An ordered list of ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    patterns: Vec<IgnorePattern>,
}

impl IgnoreRules {
    /// Rules with no patterns.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in rules.
    pub fn builtin() -> StrataResult<Self> {
        let mut rules = Self::empty();
        for pattern in BUILTIN_IGNORE_PATTERNS {
            rules.add_pattern(pattern)?;
        }
        Ok(rules)
    }

    /// Built-in rules, then `<root>/.strataignore` if present, then `extra`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Validation`] for a malformed pattern and
    /// [`StrataError::Io`] if the ignore file exists but cannot be read.
    pub fn load(root: &Path, extra: &[String]) -> StrataResult<Self> {
        let mut rules = Self::builtin()?;

        let ignore_file = root.join(IGNORE_FILENAME);
        if ignore_file.is_file() {
            let text = fs::read_to_string(&ignore_file)?;
            rules.add_lines(&text)?;
            debug!(path = %ignore_file.display(), patterns = rules.len(), "Loaded ignore file");
        }

        for pattern in extra {
            rules.add_pattern(pattern)?;
        }
        Ok(rules)
    }

    /// Append one pattern. Blank lines and `#` comments are accepted and
    /// ignored.
    pub fn add_pattern(&mut self, line: &str) -> StrataResult<()> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(());
        }
        self.patterns.push(IgnorePattern::parse(trimmed)?);
        Ok(())
    }

    /// Append every line of an ignore file.
    pub fn add_lines(&mut self, text: &str) -> StrataResult<()> {
        for line in text.lines() {
            self.add_pattern(line)?;
        }
        Ok(())
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any pattern re-includes paths.
    pub fn has_negations(&self) -> bool {
        self.patterns.iter().any(|p| p.negated)
    }

    /// Decide whether a root-relative, `/`-separated path is ignored.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let prefixes = path_prefixes(rel_path);
        let last = prefixes.len().saturating_sub(1);

        let mut ignored = false;
        for pattern in &self.patterns {
            let hit = prefixes
                .iter()
                .enumerate()
                .any(|(i, prefix)| pattern.matches(prefix, i < last || is_dir));
            if hit {
                ignored = !pattern.negated;
            }
        }
        ignored
    }

    /// Patterns as written.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.raw.as_str())
    }
}

/// `a/b/c` → `["a", "a/b", "a/b/c"]`.
fn path_prefixes(rel_path: &str) -> Vec<&str> {
    let path = rel_path.trim_matches('/');
    if path.is_empty() {
        return Vec::new();
    }
    let mut prefixes: Vec<&str> = path
        .match_indices('/')
        .map(|(i, _)| &path[..i])
        .collect();
    prefixes.push(path);
    prefixes
}

// ============================================================================
// File Entries
// ============================================================================

/// How a scanned file is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Plain or structured text.
    Note,
    /// Any other allow-listed document.
    File,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::File => "file",
        }
    }

    /// Object type the file is materialized as.
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Note => ObjectType::Note,
            Self::File => ObjectType::File,
        }
    }

    /// Classify a path by extension. `None` means the file is not tracked.
    pub fn classify(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        if is_note_extension(ext) {
            Some(Self::Note)
        } else if is_file_extension(ext) {
            Some(Self::File)
        } else {
            None
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Root-relative path, `/`-separated.
    pub rel_path: String,

    pub abs_path: PathBuf,

    pub kind: FileKind,

    /// SHA-256 of the raw bytes.
    pub content_id: String,

    pub size: u64,

    /// Modification time (Unix seconds).
    pub mtime: u64,
}

/// Why a file the walk found is missing from the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "camelCase")]
pub enum SkippedReason {
    /// Larger than the configured size limit.
    TooLarge { size: u64, limit: u64 },
    /// Could not be read or stat'ed.
    Unreadable { error: String },
}

impl std::fmt::Display for SkippedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { size, limit } => {
                write!(f, "file is {size} bytes, over the {limit} byte limit")
            }
            Self::Unreadable { error } => write!(f, "file could not be read: {error}"),
        }
    }
}

/// A tracked-kind file that exists on disk but was not hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub rel_path: String,
    pub kind: FileKind,
    pub reason: SkippedReason,
}

/// Output of a scan.
///
/// A skipped file still exists, so callers must not read its absence from
/// `entries` as a deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Hashed files, sorted by path.
    pub entries: Vec<FileEntry>,
    /// Files left out, sorted by path.
    pub skipped: Vec<SkippedFile>,
}

// ============================================================================
// Scanning
// ============================================================================

/// Scan settings.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Patterns applied after the ignore file.
    pub extra_ignore: Vec<String>,

    /// Files larger than this are skipped.
    pub max_file_size_bytes: Option<u64>,
}

/// Scan `root` with the built-in rules, its `.strataignore` and `options`.
///
/// # Errors
///
/// - [`StrataError::PathNotFound`] if `root` is not a directory
/// - [`StrataError::Validation`] for a malformed ignore pattern
pub fn scan(root: &Path, options: &ScanOptions) -> StrataResult<ScanReport> {
    let rules = IgnoreRules::load(root, &options.extra_ignore)?;
    scan_with_rules(root, rules, options.max_file_size_bytes)
}

/// Scan `root` with explicit rules.
///
/// Oversized files and files that vanish or cannot be read between walking
/// and hashing are reported in [`ScanReport::skipped`].
pub fn scan_with_rules(
    root: &Path,
    rules: IgnoreRules,
    max_file_size_bytes: Option<u64>,
) -> StrataResult<ScanReport> {
    if !root.is_dir() {
        return Err(StrataError::PathNotFound(root.display().to_string()));
    }

    let rules = Arc::new(rules);
    let (candidates, mut skipped) = collect_candidates(root, &rules, max_file_size_bytes);

    let hashed: Vec<Result<FileEntry, SkippedFile>> = candidates
        .into_par_iter()
        .map(|(abs_path, rel_path, kind)| hash_file(abs_path, rel_path, kind))
        .collect();

    let mut entries = Vec::with_capacity(hashed.len());
    for result in hashed {
        match result {
            Ok(entry) => entries.push(entry),
            Err(file) => {
                warn!(path = %file.rel_path, reason = %file.reason, "Skipping unreadable file");
                skipped.push(file);
            }
        }
    }

    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    skipped.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    debug!(
        root = %root.display(),
        files = entries.len(),
        skipped = skipped.len(),
        "Scan complete"
    );
    Ok(ScanReport { entries, skipped })
}

type Candidate = (PathBuf, String, FileKind);

fn collect_candidates(
    root: &Path,
    rules: &Arc<IgnoreRules>,
    max_file_size_bytes: Option<u64>,
) -> (Vec<Candidate>, Vec<SkippedFile>) {
    let root_path = root.to_path_buf();

    // Pruning a directory is only safe when nothing below it can be
    // re-included.
    let prune = !rules.has_negations();
    let filter_rules = Arc::clone(rules);
    let filter_root = root_path.clone();

    let walker = WalkBuilder::new(&root_path)
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if !prune || !entry.file_type().is_some_and(|t| t.is_dir()) {
                return true;
            }
            match relative_path(&filter_root, entry.path()) {
                Some(rel) if !rel.is_empty() => !filter_rules.is_ignored(&rel, true),
                _ => true,
            }
        })
        .build();

    let mut candidates = Vec::new();
    let mut skipped = Vec::new();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "Error walking directory");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        let Some(rel) = relative_path(&root_path, path) else {
            continue;
        };
        if rules.is_ignored(&rel, false) {
            continue;
        }
        let Some(kind) = FileKind::classify(path) else {
            continue;
        };
        if let Some(limit) = max_file_size_bytes {
            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(err) => {
                    skipped.push(SkippedFile {
                        rel_path: rel,
                        kind,
                        reason: SkippedReason::Unreadable {
                            error: err.to_string(),
                        },
                    });
                    continue;
                }
            };
            if size > limit {
                debug!(path = %rel, size, limit, "Skipping oversized file");
                skipped.push(SkippedFile {
                    rel_path: rel,
                    kind,
                    reason: SkippedReason::TooLarge { size, limit },
                });
                continue;
            }
        }
        candidates.push((path.to_path_buf(), rel, kind));
    }
    (candidates, skipped)
}

fn hash_file(abs_path: PathBuf, rel_path: String, kind: FileKind) -> Result<FileEntry, SkippedFile> {
    let unreadable = |rel_path: String, err: std::io::Error| SkippedFile {
        rel_path,
        kind,
        reason: SkippedReason::Unreadable {
            error: err.to_string(),
        },
    };
    let bytes = match fs::read(&abs_path) {
        Ok(bytes) => bytes,
        Err(err) => return Err(unreadable(rel_path, err)),
    };
    let metadata = match fs::metadata(&abs_path) {
        Ok(metadata) => metadata,
        Err(err) => return Err(unreadable(rel_path, err)),
    };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Ok(FileEntry {
        content_id: hash_bytes(&bytes),
        size: bytes.len() as u64,
        rel_path,
        abs_path,
        kind,
        mtime,
    })
}

/// Root-relative `/`-separated form of `path`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rules(patterns: &[&str]) -> IgnoreRules {
        let mut rules = IgnoreRules::empty();
        for p in patterns {
            rules.add_pattern(p).unwrap();
        }
        rules
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn paths(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.rel_path.as_str()).collect()
    }

    #[test]
    fn test_glob_is_single_segment() {
        let r = rules(&["*.tmp"]);
        assert!(r.is_ignored("a.tmp", false));
        assert!(r.is_ignored("deep/dir/a.tmp", false));
        assert!(!r.is_ignored("a.tmpx", false));

        let r = rules(&["docs/*.md"]);
        assert!(r.is_ignored("docs/a.md", false));
        assert!(!r.is_ignored("docs/sub/a.md", false));
        assert!(!r.is_ignored("other/docs/a.md", false));

        let r = rules(&["?.md"]);
        assert!(r.is_ignored("a.md", false));
        assert!(!r.is_ignored("ab.md", false));
    }

    #[test]
    fn test_directory_pattern_covers_descendants() {
        let r = rules(&["build/"]);
        assert!(r.is_ignored("build", true));
        assert!(r.is_ignored("build/out/a.md", false));
        assert!(r.is_ignored("src/build/a.md", false));
        // A file named `build` is not a directory.
        assert!(!r.is_ignored("build", false));
    }

    #[test]
    fn test_anchored_pattern() {
        let r = rules(&["/notes/private"]);
        assert!(r.is_ignored("notes/private/a.md", false));
        assert!(!r.is_ignored("x/notes/private/a.md", false));
    }

    #[test]
    fn test_negation_last_match_wins() {
        let r = rules(&["*.tmp", "!keep.tmp"]);
        assert!(r.is_ignored("drop.tmp", false));
        assert!(!r.is_ignored("keep.tmp", false));

        let r = rules(&["!keep.tmp", "*.tmp"]);
        assert!(r.is_ignored("keep.tmp", false));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let mut r = IgnoreRules::empty();
        r.add_lines("# comment\n\n   \n*.log\n").unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.patterns().collect::<Vec<_>>(), vec!["*.log"]);
    }

    #[test]
    fn test_malformed_patterns() {
        for bad in ["!", "/", "!/", "//", "a//b"] {
            let mut r = IgnoreRules::empty();
            assert!(
                matches!(r.add_pattern(bad), Err(StrataError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(FileKind::classify(Path::new("a/b.md")), Some(FileKind::Note));
        assert_eq!(FileKind::classify(Path::new("x.PDF")), Some(FileKind::File));
        assert_eq!(FileKind::classify(Path::new("bin.exe")), None);
        assert_eq!(FileKind::classify(Path::new("Makefile")), None);
    }

    #[test]
    fn test_scan_negation() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "keep.tmp", "k");
        write(dir.path(), "drop.tmp", "d");
        write(dir.path(), ".strataignore", "*.tmp\n!keep.tmp\n");

        let entries = scan(dir.path(), &ScanOptions::default()).unwrap().entries;
        assert_eq!(paths(&entries), vec!["keep.tmp"]);
    }

    #[test]
    fn test_scan_skips_builtin_and_unknown() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "notes/a.md", "# A");
        write(dir.path(), "docs/report.pdf", "%PDF");
        write(dir.path(), "tool.exe", "MZ");
        write(dir.path(), ".git/config.md", "x");
        write(dir.path(), "node_modules/pkg/readme.md", "x");
        write(dir.path(), ".strata/notes.md", "x");

        let entries = scan(dir.path(), &ScanOptions::default()).unwrap().entries;
        assert_eq!(paths(&entries), vec!["docs/report.pdf", "notes/a.md"]);

        let note = &entries[1];
        assert_eq!(note.kind, FileKind::Note);
        assert_eq!(note.size, 3);
        assert_eq!(note.content_id, hash_bytes(b"# A"));
        assert_eq!(note.abs_path, dir.path().join("notes/a.md"));
    }

    #[test]
    fn test_negation_inside_ignored_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "drafts/a.md", "a");
        write(dir.path(), "drafts/keep.md", "k");

        let mut options = ScanOptions::default();
        options.extra_ignore = vec!["drafts/".to_string(), "!keep.md".to_string()];
        let entries = scan(dir.path(), &options).unwrap().entries;
        assert_eq!(paths(&entries), vec!["drafts/keep.md"]);
    }

    #[test]
    fn test_max_file_size() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "small.md", "x");
        write(dir.path(), "big.md", &"x".repeat(100));

        let options = ScanOptions {
            extra_ignore: Vec::new(),
            max_file_size_bytes: Some(10),
        };
        let report = scan(dir.path(), &options).unwrap();
        assert_eq!(paths(&report.entries), vec!["small.md"]);
        assert_eq!(
            report.skipped,
            vec![SkippedFile {
                rel_path: "big.md".to_string(),
                kind: FileKind::Note,
                reason: SkippedReason::TooLarge { size: 100, limit: 10 },
            }]
        );
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let skipped = hash_file(dir.path().join("gone.md"), "gone.md".to_string(), FileKind::Note)
            .unwrap_err();
        assert_eq!(skipped.rel_path, "gone.md");
        assert!(matches!(skipped.reason, SkippedReason::Unreadable { .. }));
        assert!(skipped.reason.to_string().starts_with("file could not be read"));
    }

    #[test]
    fn test_scan_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = scan(&dir.path().join("nope"), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, StrataError::PathNotFound(_)));
    }
}
