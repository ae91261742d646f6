//! Bundle export and import.
//!
//! A bundle is a JSON document holding every object in a store (patches
//! included) and the HEAD of every view. The projection is not exported;
//! importing rebuilds it from the log.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_db::{InsertOutcome, LEGACY_HEAD_KEY};
use tracing::{debug, info};

use crate::constants::DEFAULT_VIEW;
use crate::errors::{StrataError, StrataResult};
use crate::hash::now_millis;
use crate::object::Object;
use crate::patch_manager::{rebuild_projection, RebuildReport};
use crate::payload::ObjectType;
use crate::session::Session;
use crate::view::ViewName;

/// Format tag written into every bundle.
pub const BUNDLE_FORMAT: &str = "strata-bundle/1";

/// A view HEAD as stored in a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleView {
    pub name: String,
    pub head_id: Option<String>,
}

/// Portable snapshot of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub format: String,
    pub exported_at: DateTime<Utc>,
    pub objects: Vec<Object>,
    pub views: Vec<BundleView>,
}

/// Outcome of [`import_bundle`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Objects that were new to the store.
    pub inserted: usize,
    /// Objects the store already had.
    pub already_present: usize,
    /// Views whose HEAD was set.
    pub views: usize,
    pub rebuild: RebuildReport,
}

/// Export every object and view HEAD.
pub fn export_bundle(session: &Session) -> StrataResult<Bundle> {
    let store = session.store();
    let objects: Vec<Object> = store.get_all_objects()?.into_iter().map(Object::from).collect();
    let views = store
        .list_views()?
        .into_iter()
        .map(|view| BundleView {
            name: view.name,
            head_id: view.head_id,
        })
        .collect::<Vec<_>>();

    info!(objects = objects.len(), views = views.len(), "Exported bundle");
    Ok(Bundle {
        format: BUNDLE_FORMAT.to_string(),
        exported_at: now_millis(),
        objects,
        views,
    })
}

/// Import a bundle into the session's store.
///
/// Every object is verified before anything is written. Objects are
/// inserted idempotently, views are created as needed and their HEADs set to
/// the bundle's, then the projection is rebuilt from the full log.
///
/// # Errors
///
/// - [`StrataError::Validation`] for an unknown format, an invalid view name
///   or a HEAD that is not a patch in the bundle or store
/// - [`StrataError::Integrity`] if an object does not hash to its id
pub fn import_bundle(session: &mut Session, bundle: &Bundle) -> StrataResult<ImportReport> {
    if bundle.format != BUNDLE_FORMAT {
        return Err(StrataError::validation(format!(
            "unsupported bundle format `{}` (expected `{BUNDLE_FORMAT}`)",
            bundle.format
        )));
    }
    for object in &bundle.objects {
        object.verify()?;
    }
    let mut heads = Vec::with_capacity(bundle.views.len());
    for view in &bundle.views {
        let name = ViewName::try_new(view.name.as_str())?;
        if let Some(head) = &view.head_id {
            check_head(session, bundle, head)?;
        }
        heads.push((name, view.head_id.as_deref()));
    }

    let mut report = ImportReport::default();
    let store = session.store_mut();
    for object in &bundle.objects {
        match store.insert_object(&object.to_record())? {
            InsertOutcome::Inserted => report.inserted += 1,
            InsertOutcome::AlreadyPresent => report.already_present += 1,
        }
    }

    for (name, head) in heads {
        if store.get_view(name.as_str())?.is_none() {
            store.create_view(name.as_str(), now_millis())?;
        }
        store.update_view(name.as_str(), head)?;
        if name.as_str() == DEFAULT_VIEW {
            if let Some(head) = head {
                store.set_config(LEGACY_HEAD_KEY, head)?;
            }
        }
        debug!(view = %name, head = ?head, "Imported view head");
        report.views += 1;
    }

    report.rebuild = rebuild_projection(session)?;
    info!(
        inserted = report.inserted,
        already_present = report.already_present,
        views = report.views,
        "Imported bundle"
    );
    Ok(report)
}

fn check_head(session: &Session, bundle: &Bundle, head: &str) -> StrataResult<()> {
    let in_bundle = bundle
        .objects
        .iter()
        .find(|object| object.id == head)
        .map(|object| object.object_type == ObjectType::Patch);
    let is_patch = match in_bundle {
        Some(is_patch) => is_patch,
        None => session
            .store()
            .get_object(head)?
            .is_some_and(|record| record.is_patch()),
    };
    if is_patch {
        Ok(())
    } else {
        Err(StrataError::validation(format!(
            "view head `{head}` is not a patch in the bundle or store"
        )))
    }
}

/// Write a bundle as pretty-printed JSON.
pub fn write_bundle(bundle: &Bundle, path: &Path) -> StrataResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(bundle)?)?;
    Ok(())
}

/// Read a bundle file.
pub fn read_bundle(path: &Path) -> StrataResult<Bundle> {
    if !path.exists() {
        return Err(StrataError::PathNotFound(path.display().to_string()));
    }
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchRequest;
    use crate::patch_manager::commit;
    use crate::payload::{NotePayload, Payload};
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn note(title: &str) -> Payload {
        Payload::Note(NotePayload {
            title: title.to_string(),
            body: String::new(),
            path: None,
            extra: Map::new(),
        })
    }

    fn populated() -> (Session, String) {
        let mut session = Session::in_memory().unwrap();
        let report = commit(&mut session, PatchRequest::create(note("a"))).unwrap();
        let id = report.committed().unwrap().target.clone();
        let mut changes = Map::new();
        changes.insert("title".to_string(), json!("a2"));
        commit(&mut session, PatchRequest::update(&id, changes)).unwrap();
        commit(&mut session, PatchRequest::create(note("b"))).unwrap();

        session.create_view("draft").unwrap();
        session.switch_view("draft").unwrap();
        commit(&mut session, PatchRequest::create(note("draft only"))).unwrap();
        session.switch_view("main").unwrap();
        (session, id)
    }

    #[test]
    fn test_export_import_into_empty_store() {
        let (source, id) = populated();
        let bundle = export_bundle(&source).unwrap();
        assert_eq!(bundle.format, BUNDLE_FORMAT);
        assert_eq!(bundle.views.len(), 2);

        let mut target = Session::in_memory().unwrap();
        let report = import_bundle(&mut target, &bundle).unwrap();
        assert_eq!(report.inserted, bundle.objects.len());
        assert_eq!(report.views, 2);

        assert_eq!(target.head().unwrap(), source.head().unwrap());
        assert_eq!(target.current(&id).unwrap().content["title"], "a2");
        assert_eq!(
            target.objects(None).unwrap().len(),
            source.objects(None).unwrap().len()
        );
        assert_eq!(
            target.store().get_config(LEGACY_HEAD_KEY).unwrap(),
            source.head().unwrap()
        );
    }

    #[test]
    fn test_import_is_idempotent() {
        let (source, _) = populated();
        let bundle = export_bundle(&source).unwrap();

        let mut target = Session::in_memory().unwrap();
        import_bundle(&mut target, &bundle).unwrap();
        let second = import_bundle(&mut target, &bundle).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.already_present, bundle.objects.len());
    }

    #[test]
    fn test_tampered_object_is_rejected() {
        let (source, _) = populated();
        let mut bundle = export_bundle(&source).unwrap();
        let victim = bundle
            .objects
            .iter_mut()
            .find(|o| o.object_type == ObjectType::Note)
            .unwrap();
        victim.content = json!({"title": "forged"});

        let mut target = Session::in_memory().unwrap();
        let err = import_bundle(&mut target, &bundle).unwrap_err();
        assert!(matches!(err, StrataError::Integrity { .. }));
        assert!(target.store().get_all_objects().unwrap().is_empty());
    }

    #[test]
    fn test_bad_head_and_format() {
        let (source, _) = populated();
        let mut bundle = export_bundle(&source).unwrap();
        bundle.views[0].head_id = Some("0".repeat(64));
        let mut target = Session::in_memory().unwrap();
        assert!(matches!(
            import_bundle(&mut target, &bundle),
            Err(StrataError::Validation(_))
        ));

        let mut bundle = export_bundle(&source).unwrap();
        bundle.format = "other/9".to_string();
        assert!(matches!(
            import_bundle(&mut target, &bundle),
            Err(StrataError::Validation(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let (source, _) = populated();
        let bundle = export_bundle(&source).unwrap();
        let path = dir.path().join("out/backup.json");

        write_bundle(&bundle, &path).unwrap();
        assert_eq!(read_bundle(&path).unwrap(), bundle);
        assert!(matches!(
            read_bundle(&dir.path().join("missing.json")),
            Err(StrataError::PathNotFound(_))
        ));
    }
}
