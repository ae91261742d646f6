//! Configuration for Strata.
//!
//! Two YAML layers are read:
//!
//! - **Global**: `~/.strata/config.yaml`, user-level defaults
//! - **Project**: `<root>/.strata/config.yaml`, per-repository overrides
//!
//! Both layers share one shape. Every field is optional; a missing file is
//! an empty layer. [`StrataConfig::resolve`] merges the layers (project over
//! global over built-in defaults) into concrete values.
//!
//! # Example YAML
//!
//! ```yaml
//! agent: alice
//! defaultView: main
//! scan:
//!   extraIgnore:
//!     - "*.bak"
//!     - "drafts/"
//!   maxFileSizeBytes: 5000000
//! store:
//!   busyTimeoutMs: 5000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_db::StoreConfig;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_AGENT, DEFAULT_MAX_FILE_SIZE_BYTES, GLOBAL_CONFIG_FILENAME, PROJECT_CONFIG_FILENAME,
    STRATA_DIR, STRATA_HOME_DIR, STORE_FILENAME,
};
use crate::errors::{StrataError, StrataResult};
use crate::scanner::ScanOptions;
use crate::view::ViewName;

// ============================================================================
// ConfigLayer
// ============================================================================

/// One configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLayer {
    /// Agent recorded on new patches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// View a session opens on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_view: Option<String>,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub store: StoreSection,
}

/// Scanner settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSection {
    /// Ignore patterns appended after the source's ignore file.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_ignore: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size_bytes: Option<u64>,
}

/// Store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_timeout_ms: Option<u64>,
}

impl ConfigLayer {
    /// Load a layer from a file. A missing file yields an empty layer.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn from_path(path: &Path) -> StrataResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            StrataError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| {
            StrataError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Load the global layer from `~/.strata/config.yaml`.
    pub fn load_global() -> StrataResult<Self> {
        match global_config_path() {
            Some(path) => Self::from_path(&path),
            None => {
                debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load the project layer of a repository.
    pub fn load_project(root: &Path) -> StrataResult<Self> {
        Self::from_path(&project_config_path(root))
    }

    /// Write the layer as YAML.
    pub fn save(&self, path: &Path) -> StrataResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

/// `~/.strata/config.yaml`, if the home directory is known.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(STRATA_HOME_DIR).join(GLOBAL_CONFIG_FILENAME))
}

/// `<root>/.strata/config.yaml`.
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(STRATA_DIR).join(PROJECT_CONFIG_FILENAME)
}

/// `<root>/.strata/store.db`.
pub fn store_path(root: &Path) -> PathBuf {
    root.join(STRATA_DIR).join(STORE_FILENAME)
}

// ============================================================================
// StrataConfig
// ============================================================================

/// Effective configuration after merging layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrataConfig {
    pub agent: String,
    pub default_view: ViewName,
    /// Global patterns first, then project patterns.
    pub extra_ignore: Vec<String>,
    pub max_file_size_bytes: u64,
    pub busy_timeout_ms: u64,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            agent: DEFAULT_AGENT.to_string(),
            default_view: ViewName::default_view(),
            extra_ignore: Vec::new(),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            busy_timeout_ms: StoreConfig::DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StrataConfig {
    /// Merge `project` over `global` over defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] for an empty agent, an invalid view
    /// name or a zero file size limit.
    pub fn resolve(global: &ConfigLayer, project: &ConfigLayer) -> StrataResult<Self> {
        let defaults = Self::default();

        let agent = project
            .agent
            .clone()
            .or_else(|| global.agent.clone())
            .unwrap_or(defaults.agent);
        if agent.trim().is_empty() {
            return Err(StrataError::Config("agent cannot be empty".to_string()));
        }

        let default_view = match project.default_view.as_ref().or(global.default_view.as_ref()) {
            Some(name) => ViewName::try_new(name.as_str())
                .map_err(|e| StrataError::Config(format!("defaultView: {e}")))?,
            None => defaults.default_view,
        };

        let max_file_size_bytes = project
            .scan
            .max_file_size_bytes
            .or(global.scan.max_file_size_bytes)
            .unwrap_or(defaults.max_file_size_bytes);
        if max_file_size_bytes == 0 {
            return Err(StrataError::Config(
                "scan.maxFileSizeBytes cannot be 0".to_string(),
            ));
        }
        if max_file_size_bytes < 1024 {
            warn!(
                max_file_size_bytes,
                "scan.maxFileSizeBytes is very restrictive; most files will be skipped"
            );
        }

        let extra_ignore = global
            .scan
            .extra_ignore
            .iter()
            .chain(&project.scan.extra_ignore)
            .cloned()
            .collect();

        let busy_timeout_ms = project
            .store
            .busy_timeout_ms
            .or(global.store.busy_timeout_ms)
            .unwrap_or(defaults.busy_timeout_ms);

        Ok(Self {
            agent,
            default_view,
            extra_ignore,
            max_file_size_bytes,
            busy_timeout_ms,
        })
    }

    /// Load and merge the global and project layers for a repository.
    pub fn load(root: &Path) -> StrataResult<Self> {
        let global = ConfigLayer::load_global()?;
        let project = ConfigLayer::load_project(root)?;
        Self::resolve(&global, &project)
    }

    /// Scanner options derived from this config.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            extra_ignore: self.extra_ignore.clone(),
            max_file_size_bytes: Some(self.max_file_size_bytes),
        }
    }

    /// Store settings for the repository at `root`.
    pub fn store_config(&self, root: &Path) -> StoreConfig {
        StoreConfig::new(store_path(root)).with_busy_timeout_ms(self.busy_timeout_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
