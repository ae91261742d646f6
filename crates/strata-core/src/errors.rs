//! Error types for strata-core.

use std::fmt;
use std::path::PathBuf;

use strata_db::DbError;
use thiserror::Error;

/// What kind of thing a lookup or uniqueness error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Object,
    Patch,
    View,
    Source,
    /// A short id or name used in place of a full id.
    Alias,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Object => "object",
            Self::Patch => "patch",
            Self::View => "view",
            Self::Source => "source",
            Self::Alias => "alias",
        };
        f.write_str(name)
    }
}

/// Domain-specific errors for Strata operations.
#[derive(Error, Debug)]
pub enum StrataError {
    /// The repository has not been initialized.
    #[error("Repository not initialized at {0}. Initialize it first.")]
    NotInitialized(PathBuf),

    /// A path was not found or is not usable.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// A lookup found nothing.
    #[error("{kind} `{id}` not found")]
    NotFound {
        /// What was looked up.
        kind: EntityKind,
        /// The id, name or alias that was looked up.
        id: String,
    },

    /// Input failed validation (malformed ignore pattern, missing adapter
    /// settings, invalid patch request, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Something with this identity already exists.
    #[error("{kind} `{id}` already exists")]
    Duplicate {
        /// What already exists.
        kind: EntityKind,
        /// Its id or name.
        id: String,
    },

    /// A stored object does not hash to its id.
    #[error("Integrity check failed for `{id}`: content hashes to `{actual}`")]
    Integrity {
        /// The stored id.
        id: String,
        /// The id recomputed from the stored content.
        actual: String,
    },

    /// The requested capability is declared but not implemented.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Invalid view name.
    #[error("Invalid view name `{0}`: view names must be non-empty and contain only alphanumeric characters, hyphens, underscores, periods, and forward slashes.")]
    InvalidViewName(String),

    /// Configuration file could not be read or parsed.
    #[error("Config invalid: {0}")]
    Config(String),

    /// Store failure.
    #[error("Store error: {0}")]
    Db(#[source] DbError),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StrataError {
    /// Create a not-found error.
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a duplicate error.
    pub fn duplicate(kind: EntityKind, id: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            id: id.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<DbError> for StrataError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DuplicateView { name } => Self::duplicate(EntityKind::View, name),
            DbError::DuplicateSource { name } => Self::duplicate(EntityKind::Source, name),
            other => Self::Db(other),
        }
    }
}

/// Result type alias for strata-core operations.
pub type StrataResult<T> = Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_entity() {
        let err = StrataError::not_found(EntityKind::View, "draft");
        assert_eq!(err.to_string(), "view `draft` not found");
        assert!(err.is_not_found());

        let err = StrataError::duplicate(EntityKind::Source, "notes");
        assert_eq!(err.to_string(), "source `notes` already exists");
    }

    #[test]
    fn test_db_error_converts() {
        let err: StrataError = DbError::internal("boom").into();
        assert!(matches!(err, StrataError::Db(_)));

        let err: StrataError = DbError::DuplicateView {
            name: "main".to_string(),
        }
        .into();
        assert!(matches!(
            err,
            StrataError::Duplicate {
                kind: EntityKind::View,
                ..
            }
        ));
    }
}
