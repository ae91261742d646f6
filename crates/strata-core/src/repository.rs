//! Repository detection and initialization.
//!
//! A repository is a directory containing `.strata/`, which holds the store
//! and the project config. [`Repository`] resolves the on-disk layout and
//! opens [`Session`]s configured from the merged config layers.

use std::fs;
use std::path::{Path, PathBuf};

use strata_db::open_store;
use tracing::{debug, info};

use crate::config::{project_config_path, store_path, ConfigLayer, StrataConfig};
use crate::constants::STRATA_DIR;
use crate::errors::{StrataError, StrataResult};
use crate::hash::now_millis;
use crate::session::Session;
use crate::view::ViewName;

/// Check if a path is a filesystem root (`/`, `C:\`).
fn is_disk_root(path: &Path) -> bool {
    if path.parent().is_some() {
        return false;
    }

    #[cfg(windows)]
    {
        if let Some(s) = path.to_str() {
            if s.len() >= 2 && s.chars().nth(1) == Some(':') {
                return true;
            }
        }
    }

    #[cfg(not(windows))]
    {
        if path == Path::new("/") {
            return true;
        }
    }

    path.canonicalize().ok().is_some_and(|p| p.parent().is_none())
}

fn canonical_dir(path: &Path) -> StrataResult<PathBuf> {
    let root = path
        .canonicalize()
        .map_err(|_| StrataError::PathNotFound(path.display().to_string()))?;
    if !root.is_dir() {
        return Err(StrataError::PathNotFound(root.display().to_string()));
    }
    Ok(root)
}

fn is_initialized(root: &Path) -> bool {
    store_path(root).is_file()
}

/// A repository on disk.
#[derive(Debug, Clone)]
pub struct Repository {
    /// Absolute repository root.
    root: PathBuf,

    /// `<root>/.strata`.
    strata_dir: PathBuf,

    /// Effective configuration.
    config: StrataConfig,
}

impl Repository {
    /// Initialize a repository at `root`.
    ///
    /// Creates `.strata/`, a default project config and the store, and makes
    /// sure the default view exists. Running it on an initialized repository
    /// leaves existing files alone.
    ///
    /// # Errors
    ///
    /// - [`StrataError::PathNotFound`] if `root` is not a directory
    /// - [`StrataError::Validation`] if `root` is a filesystem root
    pub fn init(root: &Path) -> StrataResult<Self> {
        let root = canonical_dir(root)?;
        if is_disk_root(&root) {
            return Err(StrataError::validation(format!(
                "cannot create a repository at filesystem root {}",
                root.display()
            )));
        }

        let strata_dir = root.join(STRATA_DIR);
        fs::create_dir_all(&strata_dir)?;

        let config_path = project_config_path(&root);
        if !config_path.exists() {
            let layer = ConfigLayer {
                default_view: Some(ViewName::default_view().to_string()),
                ..Default::default()
            };
            layer.save(&config_path)?;
            debug!(path = %config_path.display(), "Wrote project config");
        }

        let already = is_initialized(&root);
        let repo = Self::load(root)?;
        repo.open_session()?;

        if already {
            debug!(root = %repo.root.display(), "Repository already initialized");
        } else {
            info!(root = %repo.root.display(), "Initialized repository");
        }
        Ok(repo)
    }

    /// Open an initialized repository at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotInitialized`] if `root` has no store.
    pub fn open(root: &Path) -> StrataResult<Self> {
        let root = canonical_dir(root)?;
        if !is_initialized(&root) {
            return Err(StrataError::NotInitialized(root));
        }
        Self::load(root)
    }

    /// Find the repository containing `start_dir` by walking up its
    /// ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotInitialized`] if no ancestor is a repository.
    pub fn discover(start_dir: &Path) -> StrataResult<Self> {
        let start = canonical_dir(start_dir)?;
        let mut current = start.as_path();
        loop {
            if is_disk_root(current) {
                break;
            }
            if is_initialized(current) {
                return Self::load(current.to_path_buf());
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Err(StrataError::NotInitialized(start))
    }

    fn load(root: PathBuf) -> StrataResult<Self> {
        let config = StrataConfig::load(&root)?;
        Ok(Self {
            strata_dir: root.join(STRATA_DIR),
            root,
            config,
        })
    }

    /// Replace the effective configuration.
    pub fn with_config(mut self, config: StrataConfig) -> Self {
        self.config = config;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn strata_dir(&self) -> &Path {
        &self.strata_dir
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn store_path(&self) -> PathBuf {
        store_path(&self.root)
    }

    /// Open a session on the configured default view, creating the view if
    /// it does not exist yet.
    pub fn open_session(&self) -> StrataResult<Session> {
        let mut store = open_store(&self.config.store_config(&self.root))?;
        let view = self.config.default_view.clone();
        if store.get_view(view.as_str())?.is_none() {
            store.create_view(view.as_str(), now_millis())?;
            debug!(view = %view, "Created configured default view");
        }
        let session = Session::open(store, view, self.config.agent.clone())?
            .with_scan_options(self.config.scan_options());
        Ok(session)
    }
}
