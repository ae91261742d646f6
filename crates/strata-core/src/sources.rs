//! Source registry.
//!
//! Sources are looked up by name or id; the name is an alias for the id.

use std::path::Path;

use serde_json::Value;
use strata_db::{PathIndexEntry, SourceRecord};
use tracing::info;
use uuid::Uuid;

use crate::adapter::{local_root, SourceKind, ROOT_SETTING};
use crate::errors::{EntityKind, StrataError, StrataResult};
use crate::hash::now_millis;
use crate::session::Session;

/// Register a source.
///
/// A local source's `settings.root` is canonicalized so later syncs do not
/// depend on the working directory.
///
/// # Errors
///
/// - [`StrataError::Validation`] for an empty name or missing `settings.root`
/// - [`StrataError::PathNotFound`] if a local root does not exist
/// - [`StrataError::Duplicate`] if the name is taken
pub fn add_source(
    session: &mut Session,
    name: &str,
    kind: SourceKind,
    settings: Value,
) -> StrataResult<SourceRecord> {
    let name = name.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(StrataError::validation(format!(
            "invalid source name `{name}`: must be non-empty without whitespace"
        )));
    }

    let mut settings = match settings {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };
    if kind == SourceKind::Local {
        let root = local_root(&settings)?;
        let root = canonical_root(&root)?;
        if let Some(map) = settings.as_object_mut() {
            map.insert(
                ROOT_SETTING.to_string(),
                Value::String(root.to_string_lossy().into_owned()),
            );
        }
    }

    let source = SourceRecord {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        kind: kind.as_str().to_string(),
        settings,
        created_at: now_millis(),
    };
    session.store_mut().insert_source(&source)?;
    info!(source = %source.name, kind = %kind, id = %source.id, "Added source");
    Ok(source)
}

fn canonical_root(root: &Path) -> StrataResult<std::path::PathBuf> {
    let canonical = root
        .canonicalize()
        .map_err(|_| StrataError::PathNotFound(root.display().to_string()))?;
    if !canonical.is_dir() {
        return Err(StrataError::PathNotFound(root.display().to_string()));
    }
    Ok(canonical)
}

/// Look up a source by name, then by id.
///
/// # Errors
///
/// Returns [`StrataError::NotFound`] if neither matches.
pub fn get_source(session: &Session, name_or_id: &str) -> StrataResult<SourceRecord> {
    let store = session.store();
    if let Some(source) = store.get_source_by_name(name_or_id)? {
        return Ok(source);
    }
    store
        .get_source(name_or_id)?
        .ok_or_else(|| StrataError::not_found(EntityKind::Source, name_or_id))
}

/// All sources ordered by name.
pub fn list_sources(session: &Session) -> StrataResult<Vec<SourceRecord>> {
    Ok(session.store().list_sources()?)
}

/// Unregister a source and drop its path index. Objects it produced stay.
pub fn remove_source(session: &mut Session, name_or_id: &str) -> StrataResult<SourceRecord> {
    let source = get_source(session, name_or_id)?;
    session.store_mut().delete_source(&source.id)?;
    info!(source = %source.name, "Removed source");
    Ok(source)
}

/// Tracked paths of a source, ordered by path.
pub fn path_index(session: &Session, name_or_id: &str) -> StrataResult<Vec<PathIndexEntry>> {
    let source = get_source(session, name_or_id)?;
    Ok(session.store().get_path_index(&source.id)?)
}
