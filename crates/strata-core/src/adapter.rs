//! Source adapters.
//!
//! An adapter knows how to enumerate and read the files of one kind of
//! source. Only the local filesystem is implemented; the other kinds are
//! declared so they can be registered, and fail fast when used.

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_db::SourceRecord;

use crate::errors::{StrataError, StrataResult};
use crate::scanner::{scan, ScanOptions, ScanReport};

/// Settings key holding a local source's root directory.
pub const ROOT_SETTING: &str = "root";

// ============================================================================
// SourceKind
// ============================================================================

/// Kind of external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Git,
    Drive,
    Web,
    Api,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Git => "git",
            Self::Drive => "drive",
            Self::Web => "web",
            Self::Api => "api",
        }
    }

    /// Whether this build can sync the kind.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "git" => Ok(Self::Git),
            "drive" => Ok(Self::Drive),
            "web" => Ok(Self::Web),
            "api" => Ok(Self::Api),
            other => Err(StrataError::validation(format!(
                "unknown source kind `{other}` (expected local, git, drive, web or api)"
            ))),
        }
    }
}

// ============================================================================
// SourceAdapter Trait
// ============================================================================

/// Access to the files of one source.
pub trait SourceAdapter: Send {
    /// Kind of source this adapter reads.
    fn kind(&self) -> SourceKind;

    /// Enumerate tracked files, sorted by path, and the files that exist but
    /// could not be hashed.
    fn scan(&self) -> StrataResult<ScanReport>;

    /// Read the raw bytes of a source-relative path.
    fn read_file(&self, rel_path: &str) -> StrataResult<Vec<u8>>;
}

// ============================================================================
// LocalAdapter
// ============================================================================

/// Adapter for a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    root: PathBuf,
    options: ScanOptions,
}

impl LocalAdapter {
    pub fn new(root: impl Into<PathBuf>, options: ScanOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    /// Build from source settings.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Validation`] if `settings.root` is missing or
    /// not a string.
    pub fn from_settings(settings: &Value, options: ScanOptions) -> StrataResult<Self> {
        let root = local_root(settings)?;
        Ok(Self::new(root, options))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SourceAdapter for LocalAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    fn scan(&self) -> StrataResult<ScanReport> {
        scan(&self.root, &self.options)
    }

    fn read_file(&self, rel_path: &str) -> StrataResult<Vec<u8>> {
        let rel = Path::new(rel_path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(StrataError::validation(format!(
                "path `{rel_path}` is not relative to the source root"
            )));
        }
        Ok(fs::read(self.root.join(rel))?)
    }
}

/// The `root` setting of a local source.
pub fn local_root(settings: &Value) -> StrataResult<PathBuf> {
    settings
        .get(ROOT_SETTING)
        .and_then(Value::as_str)
        .filter(|root| !root.trim().is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| {
            StrataError::validation("local source requires a string `settings.root`")
        })
}

// ============================================================================
// UnsupportedAdapter
// ============================================================================

/// Placeholder for declared but unimplemented source kinds.
#[derive(Debug, Clone, Copy)]
pub struct UnsupportedAdapter {
    kind: SourceKind,
}

impl UnsupportedAdapter {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind }
    }

    fn error(&self) -> StrataError {
        StrataError::Unsupported(format!("{} sources are not supported yet", self.kind))
    }
}

impl SourceAdapter for UnsupportedAdapter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn scan(&self) -> StrataResult<ScanReport> {
        Err(self.error())
    }

    fn read_file(&self, _rel_path: &str) -> StrataResult<Vec<u8>> {
        Err(self.error())
    }
}

/// Build the adapter for a registered source.
///
/// # Errors
///
/// Returns [`StrataError::Validation`] for an unknown kind or invalid
/// settings.
pub fn adapter_for(source: &SourceRecord, options: ScanOptions) -> StrataResult<Box<dyn SourceAdapter>> {
    let kind: SourceKind = source.kind.parse()?;
    match kind {
        SourceKind::Local => Ok(Box::new(LocalAdapter::from_settings(&source.settings, options)?)),
        other => Ok(Box::new(UnsupportedAdapter::new(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    fn source(kind: &str, settings: Value) -> SourceRecord {
        SourceRecord {
            id: "id".to_string(),
            name: "src".to_string(),
            kind: kind.to_string(),
            settings,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("local".parse::<SourceKind>().unwrap(), SourceKind::Local);
        assert_eq!("GIT".parse::<SourceKind>().unwrap(), SourceKind::Git);
        assert!(matches!(
            "ftp".parse::<SourceKind>(),
            Err(StrataError::Validation(_))
        ));
    }

    #[test]
    fn test_local_requires_root() {
        let err = adapter_for(&source("local", json!({})), ScanOptions::default()).err().unwrap();
        assert!(matches!(err, StrataError::Validation(_)));

        let err = adapter_for(&source("local", json!({"root": 3})), ScanOptions::default()).err().unwrap();
        assert!(matches!(err, StrataError::Validation(_)));
    }

    #[test]
    fn test_unsupported_kinds_fail_fast() {
        for kind in ["git", "drive", "web", "api"] {
            let adapter = adapter_for(&source(kind, json!({})), ScanOptions::default()).unwrap();
            assert!(matches!(adapter.scan(), Err(StrataError::Unsupported(_))));
            assert!(matches!(adapter.read_file("a.md"), Err(StrataError::Unsupported(_))));
        }
    }

    #[test]
    fn test_local_scan_and_read() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.md"), "# A").unwrap();

        let settings = json!({"root": dir.path().to_string_lossy()});
        let adapter = adapter_for(&source("local", settings), ScanOptions::default()).unwrap();

        assert_eq!(adapter.kind(), SourceKind::Local);
        assert_eq!(adapter.scan().unwrap().entries.len(), 1);
        assert_eq!(adapter.read_file("a.md").unwrap(), b"# A");
        assert!(matches!(
            adapter.read_file("../outside.md"),
            Err(StrataError::Validation(_))
        ));
    }
}
