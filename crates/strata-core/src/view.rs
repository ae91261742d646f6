//! View names.
//!
//! A view is a named, independent patch chain. This module only deals with
//! the name; HEAD bookkeeping lives in the store.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_VIEW;
use crate::errors::StrataError;

/// A validated view name.
///
/// View names follow these rules:
/// - Must be non-empty
/// - Can only contain ASCII alphanumerics, `-`, `_`, `.` and `/`
/// - Cannot start or end with `/`
/// - Cannot contain `//`
///
/// # Example
///
/// ```
/// use strata_core::ViewName;
///
/// assert!(ViewName::try_new("main").is_ok());
/// assert!(ViewName::try_new("draft/2024-q1").is_ok());
///
/// assert!(ViewName::try_new("").is_err());
/// assert!(ViewName::try_new("with spaces").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ViewName(String);

impl ViewName {
    /// Create a view name with validation.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::InvalidViewName`] if the name breaks any of the
    /// rules above.
    pub fn try_new(name: impl Into<String>) -> Result<Self, StrataError> {
        let name = name.into();
        if is_valid_view_name(&name) {
            Ok(Self(name))
        } else {
            Err(StrataError::InvalidViewName(name))
        }
    }

    /// The default view (`main`).
    pub fn default_view() -> Self {
        Self(DEFAULT_VIEW.to_string())
    }

    /// Get the view name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the default view.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_VIEW
    }
}

/// Check if a string is a valid view name.
pub fn is_valid_view_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    if name.starts_with('/') || name.ends_with('/') || name.contains("//") {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.'))
}

impl std::fmt::Display for ViewName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for ViewName {
    fn default() -> Self {
        Self::default_view()
    }
}

impl AsRef<str> for ViewName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ViewName {
    type Error = StrataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

impl From<ViewName> for String {
    fn from(value: ViewName) -> Self {
        value.0
    }
}

// ============================================================================
// Tests
// ============================================================================
