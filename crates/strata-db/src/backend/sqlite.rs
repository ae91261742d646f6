//! SQLite object store backend.
//!
//! All tables live in one database file opened in WAL mode, so readers see
//! either the state before or after a commit, never a partial one.
//!
//! ## Tables
//!
//! - `objects` - immutable objects; `seq` records insertion order and
//!   `patch_target` is extracted from patch payloads at insert so
//!   [`get_patches_by_target`](ObjectStoreBackend::get_patches_by_target)
//!   is an index lookup
//! - `state_view` - the projection
//! - `views` - view name to HEAD
//! - `config` - key/value settings
//! - `sources`, `path_index` - source registry and drift bookkeeping

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use tracing::debug;

use crate::entities::{
    CommitBatch, CommitReceipt, InsertOutcome, ObjectRecord, PathIndexEntry, PathIndexWrite,
    SourceRecord, StateViewEntry, ViewRecord, LEGACY_HEAD_KEY, PATCH_TYPE, SCHEMA_VERSION,
};
use crate::error::{DbError, DbResult};
use crate::traits::{ObjectStoreBackend, StoreConfig};

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;

CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS objects (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  type TEXT NOT NULL,
  content_json TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL,
  patch_target TEXT
);

CREATE INDEX IF NOT EXISTS idx_objects_type
  ON objects(type, created_at_ms, seq);
CREATE INDEX IF NOT EXISTS idx_objects_patch_target
  ON objects(patch_target, created_at_ms, seq) WHERE patch_target IS NOT NULL;

CREATE TABLE IF NOT EXISTS state_view (
  object_id TEXT PRIMARY KEY,
  type TEXT NOT NULL,
  content_json TEXT NOT NULL,
  is_deleted INTEGER NOT NULL DEFAULT 0,
  updated_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_state_view_type ON state_view(type, is_deleted);

CREATE TABLE IF NOT EXISTS views (
  name TEXT PRIMARY KEY,
  head_id TEXT,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS config (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sources (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL UNIQUE,
  kind TEXT NOT NULL,
  settings_json TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS path_index (
  source_id TEXT NOT NULL,
  path TEXT NOT NULL,
  content_id TEXT NOT NULL,
  object_id TEXT NOT NULL,
  object_type TEXT NOT NULL,
  size INTEGER NOT NULL,
  mtime INTEGER NOT NULL,
  tracked_at_ms INTEGER NOT NULL,
  PRIMARY KEY (source_id, path)
);
"#;

const OBJECT_COLUMNS: &str = "id, type, content_json, created_at_ms";
const STATE_VIEW_COLUMNS: &str = "object_id, type, content_json, is_deleted, updated_at_ms";
const VIEW_COLUMNS: &str = "name, head_id, created_at_ms, updated_at_ms";
const SOURCE_COLUMNS: &str = "id, name, kind, settings_json, created_at_ms";

/// SQLite-backed object store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a store and install the schema.
    pub fn open(config: &StoreConfig) -> DbResult<Self> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                debug!("Opening SQLite store at {:?}", path);
                Connection::open(path)?
            }
            None => {
                debug!("Opening in-memory SQLite store");
                Connection::open_in_memory()?
            }
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
            params!["schema_version", SCHEMA_VERSION],
        )?;
        Ok(Self { conn })
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> DbResult<Self> {
        Self::open(&StoreConfig::in_memory())
    }
}

impl ObjectStoreBackend for SqliteStore {
    fn insert_object(&mut self, record: &ObjectRecord) -> DbResult<InsertOutcome> {
        insert_object_conn(&self.conn, record)
    }

    fn get_object(&self, id: &str) -> DbResult<Option<ObjectRecord>> {
        select_object(&self.conn, id)
    }

    fn get_objects_by_type(&self, object_type: &str) -> DbResult<Vec<ObjectRecord>> {
        query_objects(
            &self.conn,
            &format!(
                "SELECT {OBJECT_COLUMNS} FROM objects WHERE type=?1 ORDER BY created_at_ms ASC, seq ASC"
            ),
            params![object_type],
        )
    }

    fn get_patches_by_target(&self, target: &str) -> DbResult<Vec<ObjectRecord>> {
        query_objects(
            &self.conn,
            &format!(
                "SELECT {OBJECT_COLUMNS} FROM objects WHERE patch_target=?1 \
                 ORDER BY created_at_ms ASC, seq ASC"
            ),
            params![target],
        )
    }

    fn get_all_patches(&self, limit: Option<usize>) -> DbResult<Vec<ObjectRecord>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        query_objects(
            &self.conn,
            &format!(
                "SELECT {OBJECT_COLUMNS} FROM objects WHERE type=?1 \
                 ORDER BY created_at_ms DESC, seq DESC LIMIT ?2"
            ),
            params![PATCH_TYPE, limit],
        )
    }

    fn get_patch_log(&self) -> DbResult<Vec<ObjectRecord>> {
        self.get_objects_by_type(PATCH_TYPE)
    }

    fn get_all_objects(&self) -> DbResult<Vec<ObjectRecord>> {
        query_objects(
            &self.conn,
            &format!("SELECT {OBJECT_COLUMNS} FROM objects ORDER BY seq ASC"),
            [],
        )
    }

    fn upsert_state_view(&mut self, entry: &StateViewEntry) -> DbResult<()> {
        upsert_state_view_conn(&self.conn, entry)
    }

    fn get_state_view_object(&self, object_id: &str) -> DbResult<Option<StateViewEntry>> {
        Ok(select_state_view(&self.conn, object_id)?.filter(|entry| !entry.is_deleted))
    }

    fn get_state_view_entry(&self, object_id: &str) -> DbResult<Option<StateViewEntry>> {
        select_state_view(&self.conn, object_id)
    }

    fn get_all_state_view_objects(
        &self,
        object_type: Option<&str>,
        include_deleted: bool,
    ) -> DbResult<Vec<StateViewEntry>> {
        let sql = format!(
            "SELECT {STATE_VIEW_COLUMNS} FROM state_view \
             WHERE (?1 IS NULL OR type=?1) AND (?2 OR is_deleted=0) \
             ORDER BY object_id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![object_type, include_deleted])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(state_view_from_row(row)?);
        }
        Ok(out)
    }

    fn replace_state_view(&mut self, entries: &[StateViewEntry]) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM state_view", [])?;
        for entry in entries {
            upsert_state_view_conn(&tx, entry)?;
        }
        tx.commit()?;
        debug!(entries = entries.len(), "Replaced state view");
        Ok(())
    }

    fn get_view(&self, name: &str) -> DbResult<Option<ViewRecord>> {
        select_view(&self.conn, name)
    }

    fn create_view(&mut self, name: &str, at: DateTime<Utc>) -> DbResult<ViewRecord> {
        let tx = self.conn.transaction()?;
        if select_view(&tx, name)?.is_some() {
            return Err(DbError::DuplicateView {
                name: name.to_string(),
            });
        }
        tx.execute(
            "INSERT INTO views(name, head_id, created_at_ms, updated_at_ms) VALUES (?1, NULL, ?2, ?2)",
            params![name, at.timestamp_millis()],
        )?;
        let view = select_view(&tx, name)?
            .ok_or_else(|| DbError::internal(format!("view `{name}` vanished after insert")))?;
        tx.commit()?;
        Ok(view)
    }

    fn update_view(&mut self, name: &str, head_id: Option<&str>) -> DbResult<()> {
        set_view_head_conn(&self.conn, name, head_id, Utc::now())
    }

    fn delete_view(&mut self, name: &str) -> DbResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM views WHERE name=?1", params![name])?;
        Ok(changed > 0)
    }

    fn list_views(&self) -> DbResult<Vec<ViewRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {VIEW_COLUMNS} FROM views ORDER BY name ASC"))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(view_from_row(row)?);
        }
        Ok(out)
    }

    fn get_config(&self, key: &str) -> DbResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key=?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_config(&mut self, key: &str, value: &str) -> DbResult<()> {
        set_config_conn(&self.conn, key, value)
    }

    fn insert_source(&mut self, source: &SourceRecord) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        let taken = tx
            .query_row(
                "SELECT 1 FROM sources WHERE name=?1 OR id=?2",
                params![source.name, source.id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if taken {
            return Err(DbError::DuplicateSource {
                name: source.name.clone(),
            });
        }
        tx.execute(
            "INSERT INTO sources(id, name, kind, settings_json, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                source.id,
                source.name,
                source.kind,
                serde_json::to_string(&source.settings)?,
                source.created_at.timestamp_millis(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_source(&self, id: &str) -> DbResult<Option<SourceRecord>> {
        select_source(&self.conn, "id", id)
    }

    fn get_source_by_name(&self, name: &str) -> DbResult<Option<SourceRecord>> {
        select_source(&self.conn, "name", name)
    }

    fn list_sources(&self) -> DbResult<Vec<SourceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY name ASC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(source_from_row(row)?);
        }
        Ok(out)
    }

    fn delete_source(&mut self, id: &str) -> DbResult<bool> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM path_index WHERE source_id=?1", params![id])?;
        let changed = tx.execute("DELETE FROM sources WHERE id=?1", params![id])?;
        tx.commit()?;
        Ok(changed > 0)
    }

    fn get_path_index(&self, source_id: &str) -> DbResult<Vec<PathIndexEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, path, content_id, object_id, object_type, size, mtime, tracked_at_ms \
             FROM path_index WHERE source_id=?1 ORDER BY path ASC",
        )?;
        let mut rows = stmt.query(params![source_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(PathIndexEntry {
                source_id: row.get(0)?,
                path: row.get(1)?,
                content_id: row.get(2)?,
                object_id: row.get(3)?,
                object_type: row.get(4)?,
                size: u64::try_from(row.get::<_, i64>(5)?).unwrap_or(0),
                mtime: u64::try_from(row.get::<_, i64>(6)?).unwrap_or(0),
                tracked_at: from_ms("path_index", row.get(7)?)?,
            });
        }
        Ok(out)
    }

    fn commit_patch(&mut self, batch: &CommitBatch) -> DbResult<CommitReceipt> {
        let tx = self.conn.transaction()?;

        let actual = select_view(&tx, &batch.view)?.and_then(|view| view.head_id);
        if actual != batch.expected_head {
            // Dropping the transaction rolls it back.
            return Err(DbError::HeadMoved {
                view: batch.view.clone(),
                expected: batch.expected_head.clone(),
                actual,
            });
        }

        for object in &batch.objects {
            insert_object_conn(&tx, object)?;
        }
        let insert = insert_object_conn(&tx, &batch.patch)?;
        set_view_head_conn(&tx, &batch.view, Some(&batch.patch.id), batch.patch.created_at)?;
        if batch.mirror_legacy_head {
            set_config_conn(&tx, LEGACY_HEAD_KEY, &batch.patch.id)?;
        }
        for entry in &batch.projection {
            upsert_state_view_conn(&tx, entry)?;
        }
        for write in &batch.path_index {
            apply_path_index_write(&tx, write)?;
        }

        tx.commit()?;
        debug!(
            view = %batch.view,
            head = %batch.patch.id,
            projection_writes = batch.projection.len(),
            path_index_writes = batch.path_index.len(),
            "Committed patch batch"
        );

        Ok(CommitReceipt {
            head_id: batch.patch.id.clone(),
            parent_id: batch.expected_head.clone(),
            insert,
            projection_writes: batch.projection.len(),
        })
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn from_ms(table: &'static str, ms: i64) -> DbResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::corrupt(table, format!("timestamp out of range: {ms}")))
}

fn parse_json(table: &'static str, raw: &str) -> DbResult<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| DbError::corrupt(table, e.to_string()))
}

fn object_from_row(row: &Row<'_>) -> DbResult<ObjectRecord> {
    let content_json: String = row.get(2)?;
    Ok(ObjectRecord {
        id: row.get(0)?,
        object_type: row.get(1)?,
        content: parse_json("objects", &content_json)?,
        created_at: from_ms("objects", row.get(3)?)?,
    })
}

fn state_view_from_row(row: &Row<'_>) -> DbResult<StateViewEntry> {
    let content_json: String = row.get(2)?;
    Ok(StateViewEntry {
        object_id: row.get(0)?,
        object_type: row.get(1)?,
        content: parse_json("state_view", &content_json)?,
        is_deleted: row.get(3)?,
        updated_at: from_ms("state_view", row.get(4)?)?,
    })
}

fn view_from_row(row: &Row<'_>) -> DbResult<ViewRecord> {
    Ok(ViewRecord {
        name: row.get(0)?,
        head_id: row.get(1)?,
        created_at: from_ms("views", row.get(2)?)?,
        updated_at: from_ms("views", row.get(3)?)?,
    })
}

fn source_from_row(row: &Row<'_>) -> DbResult<SourceRecord> {
    let settings_json: String = row.get(3)?;
    Ok(SourceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        settings: parse_json("sources", &settings_json)?,
        created_at: from_ms("sources", row.get(4)?)?,
    })
}

fn query_objects<P: Params>(conn: &Connection, sql: &str, params: P) -> DbResult<Vec<ObjectRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(object_from_row(row)?);
    }
    Ok(out)
}

// ============================================================================
// Connection-level operations (shared by plain calls and transactions)
// ============================================================================

fn select_object(conn: &Connection, id: &str) -> DbResult<Option<ObjectRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {OBJECT_COLUMNS} FROM objects WHERE id=?1"))?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(object_from_row(row)?)),
        None => Ok(None),
    }
}

fn insert_object_conn(conn: &Connection, record: &ObjectRecord) -> DbResult<InsertOutcome> {
    if let Some(existing) = select_object(conn, &record.id)? {
        let identical = existing.object_type == record.object_type
            && existing.content == record.content
            && existing.created_at.timestamp_millis() == record.created_at.timestamp_millis();
        if identical {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        return Err(DbError::Conflict {
            id: record.id.clone(),
        });
    }

    conn.execute(
        "INSERT INTO objects(id, type, content_json, created_at_ms, patch_target) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.id,
            record.object_type,
            serde_json::to_string(&record.content)?,
            record.created_at.timestamp_millis(),
            record.patch_target(),
        ],
    )?;
    Ok(InsertOutcome::Inserted)
}

fn select_state_view(conn: &Connection, object_id: &str) -> DbResult<Option<StateViewEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STATE_VIEW_COLUMNS} FROM state_view WHERE object_id=?1"
    ))?;
    let mut rows = stmt.query(params![object_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(state_view_from_row(row)?)),
        None => Ok(None),
    }
}

fn upsert_state_view_conn(conn: &Connection, entry: &StateViewEntry) -> DbResult<()> {
    conn.execute(
        "INSERT INTO state_view(object_id, type, content_json, is_deleted, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(object_id) DO UPDATE SET \
           type=excluded.type, content_json=excluded.content_json, \
           is_deleted=excluded.is_deleted, updated_at_ms=excluded.updated_at_ms",
        params![
            entry.object_id,
            entry.object_type,
            serde_json::to_string(&entry.content)?,
            entry.is_deleted,
            entry.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn select_view(conn: &Connection, name: &str) -> DbResult<Option<ViewRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {VIEW_COLUMNS} FROM views WHERE name=?1"))?;
    let mut rows = stmt.query(params![name])?;
    match rows.next()? {
        Some(row) => Ok(Some(view_from_row(row)?)),
        None => Ok(None),
    }
}

fn set_view_head_conn(
    conn: &Connection,
    name: &str,
    head_id: Option<&str>,
    at: DateTime<Utc>,
) -> DbResult<()> {
    conn.execute(
        "INSERT INTO views(name, head_id, created_at_ms, updated_at_ms) VALUES (?1, ?2, ?3, ?3) \
         ON CONFLICT(name) DO UPDATE SET head_id=excluded.head_id, updated_at_ms=excluded.updated_at_ms",
        params![name, head_id, at.timestamp_millis()],
    )?;
    Ok(())
}

fn set_config_conn(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    conn.execute(
        "INSERT INTO config(key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn select_source(conn: &Connection, column: &str, value: &str) -> DbResult<Option<SourceRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SOURCE_COLUMNS} FROM sources WHERE {column}=?1"
    ))?;
    let mut rows = stmt.query(params![value])?;
    match rows.next()? {
        Some(row) => Ok(Some(source_from_row(row)?)),
        None => Ok(None),
    }
}

fn apply_path_index_write(conn: &Connection, write: &PathIndexWrite) -> DbResult<()> {
    match write {
        PathIndexWrite::Upsert(entry) => {
            conn.execute(
                "INSERT INTO path_index(source_id, path, content_id, object_id, object_type, size, mtime, tracked_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(source_id, path) DO UPDATE SET \
                   content_id=excluded.content_id, object_id=excluded.object_id, \
                   object_type=excluded.object_type, size=excluded.size, \
                   mtime=excluded.mtime, tracked_at_ms=excluded.tracked_at_ms",
                params![
                    entry.source_id,
                    entry.path,
                    entry.content_id,
                    entry.object_id,
                    entry.object_type,
                    i64::try_from(entry.size).unwrap_or(i64::MAX),
                    i64::try_from(entry.mtime).unwrap_or(i64::MAX),
                    entry.tracked_at.timestamp_millis(),
                ],
            )?;
        }
        PathIndexWrite::Remove { source_id, path } => {
            conn.execute(
                "DELETE FROM path_index WHERE source_id=?1 AND path=?2",
                params![source_id, path],
            )?;
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
