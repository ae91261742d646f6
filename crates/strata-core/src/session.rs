//! The session handle.
//!
//! A [`Session`] owns one store handle and carries the active view and the
//! agent name recorded on new patches. Every patch-manager call takes the
//! session explicitly; nothing is looked up from ambient state.

use strata_db::{open_store, ObjectStoreBackend, StateViewEntry, StoreConfig, ViewRecord};
use tracing::{debug, info};

use crate::constants::DEFAULT_AGENT;
use crate::errors::{EntityKind, StrataError, StrataResult};
use crate::hash::now_millis;
use crate::object::Object;
use crate::payload::ObjectType;
use crate::scanner::ScanOptions;
use crate::view::ViewName;

/// An open repository session.
pub struct Session {
    store: Box<dyn ObjectStoreBackend>,
    view: ViewName,
    agent: String,
    scan_options: ScanOptions,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("view", &self.view)
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Open a session on `view`.
    ///
    /// The default view is created on first use; any other view must
    /// already exist.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] if a non-default view does not exist.
    pub fn open(
        mut store: Box<dyn ObjectStoreBackend>,
        view: ViewName,
        agent: impl Into<String>,
    ) -> StrataResult<Self> {
        if store.get_view(view.as_str())?.is_none() {
            if !view.is_default() {
                return Err(StrataError::not_found(EntityKind::View, view.as_str()));
            }
            store.create_view(view.as_str(), now_millis())?;
            debug!(view = %view, "Created default view");
        }
        Ok(Self {
            store,
            view,
            agent: agent.into(),
            scan_options: ScanOptions::default(),
        })
    }

    /// Open a session on a fresh in-memory store.
    pub fn in_memory() -> StrataResult<Self> {
        let store = open_store(&StoreConfig::in_memory())?;
        Self::open(store, ViewName::default_view(), DEFAULT_AGENT)
    }

    /// Replace the agent recorded on new patches.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Replace the options used when scanning sources.
    pub fn with_scan_options(mut self, options: ScanOptions) -> Self {
        self.scan_options = options;
        self
    }

    pub fn scan_options(&self) -> &ScanOptions {
        &self.scan_options
    }

    /// The active view.
    pub fn view(&self) -> &ViewName {
        &self.view
    }

    /// The agent recorded on new patches.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn store(&self) -> &dyn ObjectStoreBackend {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn ObjectStoreBackend {
        self.store.as_mut()
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// HEAD of the active view.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] if the active view was deleted
    /// behind this session's back.
    pub fn head(&self) -> StrataResult<Option<String>> {
        self.store
            .get_view(self.view.as_str())?
            .map(|view| view.head_id)
            .ok_or_else(|| StrataError::not_found(EntityKind::View, self.view.as_str()))
    }

    /// Make `name` the active view. Only affects which HEAD later commits
    /// extend.
    pub fn switch_view(&mut self, name: &str) -> StrataResult<()> {
        let view = ViewName::try_new(name)?;
        if self.store.get_view(view.as_str())?.is_none() {
            return Err(StrataError::not_found(EntityKind::View, name));
        }
        info!(from = %self.view, to = %view, "Switched view");
        self.view = view;
        Ok(())
    }

    /// Create an empty view.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Duplicate`] if the view exists.
    pub fn create_view(&mut self, name: &str) -> StrataResult<ViewRecord> {
        let view = ViewName::try_new(name)?;
        let record = self.store.create_view(view.as_str(), now_millis())?;
        info!(view = %view, "Created view");
        Ok(record)
    }

    /// Delete a view. Its patches stay in the object table.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Validation`] for the active view and
    /// [`StrataError::NotFound`] for an unknown one.
    pub fn delete_view(&mut self, name: &str) -> StrataResult<()> {
        if name == self.view.as_str() {
            return Err(StrataError::validation(format!(
                "cannot delete the active view `{name}`"
            )));
        }
        if !self.store.delete_view(name)? {
            return Err(StrataError::not_found(EntityKind::View, name));
        }
        info!(view = name, "Deleted view");
        Ok(())
    }

    /// All views ordered by name.
    pub fn list_views(&self) -> StrataResult<Vec<ViewRecord>> {
        Ok(self.store.list_views()?)
    }

    // ========================================================================
    // Objects and projection
    // ========================================================================

    /// Get a stored object.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] if no object has this id.
    pub fn get_object(&self, id: &str) -> StrataResult<Object> {
        self.store
            .get_object(id)?
            .map(Object::from)
            .ok_or_else(|| StrataError::not_found(EntityKind::Object, id))
    }

    /// Re-hash a stored object and check it against its id.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Integrity`] if the stored content no longer
    /// hashes to the id, [`StrataError::NotFound`] if it is absent.
    pub fn verify_object(&self, id: &str) -> StrataResult<Object> {
        let object = self.get_object(id)?;
        object.verify()?;
        Ok(object)
    }

    /// Current live state of an object.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::NotFound`] if the object is absent or deleted.
    pub fn current(&self, id: &str) -> StrataResult<StateViewEntry> {
        self.store
            .get_state_view_object(id)?
            .ok_or_else(|| StrataError::not_found(EntityKind::Object, id))
    }

    /// Live projection entries, optionally of one type, ordered by id.
    pub fn objects(&self, object_type: Option<&ObjectType>) -> StrataResult<Vec<StateViewEntry>> {
        Ok(self
            .store
            .get_all_state_view_objects(object_type.map(|t| t.as_str()), false)?)
    }
}
