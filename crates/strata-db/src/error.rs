//! Error types for strata-db.

use thiserror::Error;

/// Result type alias for strata-db operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur in strata-db operations.
#[derive(Debug, Error)]
pub enum DbError {
    // ========================================================================
    // Write conflicts
    // ========================================================================
    /// An object with this id exists but its stored record differs.
    ///
    /// Ids are content addresses, so this means either a hashing bug upstream
    /// or a corrupted row; it is never silently overwritten.
    #[error("Object `{id}` already exists with different content")]
    Conflict { id: String },

    /// The view HEAD changed between the caller reading it and committing.
    #[error("HEAD of view `{view}` moved: expected {expected:?}, found {actual:?}")]
    HeadMoved {
        view: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// A view with this name already exists.
    #[error("View `{name}` already exists")]
    DuplicateView { name: String },

    /// A source with this name already exists.
    #[error("Source `{name}` already exists")]
    DuplicateSource { name: String },

    // ========================================================================
    // Read errors
    // ========================================================================
    /// A stored row could not be decoded.
    #[error("Corrupt row in `{table}`: {message}")]
    Corrupt { table: &'static str, message: String },

    // ========================================================================
    // General errors
    // ========================================================================
    /// SQLite error wrapper.
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error wrapper.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a corrupt-row error.
    pub fn corrupt(table: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
