//! Common constants used throughout strata-core.
//!
//! This module centralizes paths, directory names, and classification tables
//! to avoid duplication and ensure consistency across the codebase.

// ============================================================================
// Directory and File Names
// ============================================================================

/// The name of the Strata metadata directory within a repository root.
pub const STRATA_DIR: &str = ".strata";

/// Database file inside [`STRATA_DIR`].
pub const STORE_FILENAME: &str = "store.db";

/// Project configuration file inside [`STRATA_DIR`].
pub const PROJECT_CONFIG_FILENAME: &str = "config.yaml";

/// Global configuration directory under the user's home.
pub const STRATA_HOME_DIR: &str = ".strata";

/// Global configuration file inside [`STRATA_HOME_DIR`].
pub const GLOBAL_CONFIG_FILENAME: &str = "config.yaml";

/// Repository-local ignore file, read from the root of a scanned source.
pub const IGNORE_FILENAME: &str = ".strataignore";

/// Name of the view every repository starts with.
pub const DEFAULT_VIEW: &str = "main";

/// Agent recorded on patches when none is configured.
pub const DEFAULT_AGENT: &str = "strata";

// ============================================================================
// Defaults
// ============================================================================

/// Files larger than this are skipped by the scanner (10 MiB).
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

// ============================================================================
// Built-in Ignore Rules
// ============================================================================

/// Patterns applied before any ignore file.
///
/// These typically contain metadata or generated content that should never
/// become knowledge. Directory patterns end with `/`.
pub const BUILTIN_IGNORE_PATTERNS: &[&str] = &[
    ".git/",
    ".strata/",
    ".hg/",
    ".svn/",
    "node_modules/",
    "target/",
    "__pycache__/",
    ".venv/",
    ".DS_Store",
    "Thumbs.db",
    "*.swp",
    "*~",
];

// ============================================================================
// Extension Classification
// ============================================================================

/// Extensions tracked as `note` (plain or structured text).
pub const NOTE_EXTENSIONS: &[&str] = &[
    "md", "markdown", "mdx", "txt", "text", "org", "rst", "adoc", // Prose
    "json", "yaml", "yml", "toml", "csv", "tsv", // Structured text
    "html", "htm", "xml",
];

/// Extensions tracked as `file` (binary or opaque documents).
pub const FILE_EXTENSIONS: &[&str] = &[
    // Documents
    "pdf", "doc", "docx", "odt", "rtf", "xls", "xlsx", "ods", "ppt", "pptx", "odp", "epub",
    // Images
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tif", "tiff", "heic",
    // Audio/Video
    "mp3", "m4a", "wav", "flac", "ogg", "mp4", "mov", "webm", "mkv",
    // Archives
    "zip", "tar", "gz", "7z",
    // Raw data
    "bin", "dat", "tmp",
];

/// Check whether an extension (without the dot) is a note extension.
#[inline]
pub fn is_note_extension(ext: &str) -> bool {
    NOTE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

/// Check whether an extension (without the dot) is a file extension.
#[inline]
pub fn is_file_extension(ext: &str) -> bool {
    FILE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_tables_are_disjoint() {
        for ext in NOTE_EXTENSIONS {
            assert!(!is_file_extension(ext), "{ext} is in both tables");
        }
    }

    #[test]
    fn test_extension_checks_ignore_case() {
        assert!(is_note_extension("MD"));
        assert!(is_file_extension("PDF"));
        assert!(!is_note_extension("exe"));
        assert!(!is_file_extension("exe"));
    }
}
