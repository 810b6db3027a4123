//! DiagramStore - SQLite-backed versioned document store.
//!
//! Owns four record sets: diagrams, their version history (the ledger),
//! per-diagram filters and one global settings blob. Every write that
//! touches more than one row runs in a single transaction: a diagram
//! update, its history entry and the retention prune commit together or
//! not at all.
//!
//! The store does not lock per diagram. Two concurrent `replace` calls on
//! the same id both commit and the later one wins; callers that need
//! read-modify-write safety go through `MutationCoordinator`.
//!
//! ## Example
//!
//! ```ignore
//! use diagram_ledger::{DiagramStore, parse_payload};
//!
//! let store = DiagramStore::in_memory(100)?;
//! store.create(parse_payload(br#"{"id":"d1","name":"N","databaseType":"generic"}"#)?)?;
//! store.patch("d1", parse_payload(br#"{"name":"N2"}"#)?)?;
//! assert_eq!(store.list_versions("d1")?.len(), 2);
//! ```

mod filters;
mod ledger;
mod settings;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::diagram::{
    is_touch_only, merge_patch, normalize_payload, now_timestamp, DiagramMeta, Payload,
};
use crate::error::StoreError;

pub use ledger::{VersionAction, VersionSummary};

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS diagrams (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    database_type TEXT NOT NULL,
    database_edition TEXT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS diagram_versions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    diagram_id TEXT NOT NULL,
    name TEXT NOT NULL,
    payload TEXT NOT NULL,
    action TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_diagram_versions_diagram_id_id
ON diagram_versions(diagram_id, id DESC);

CREATE TABLE IF NOT EXISTS diagram_filters (
    diagram_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Handle to the diagram database. Clone-friendly via Arc; clones share
/// one connection.
#[derive(Clone)]
pub struct DiagramStore {
    conn: Arc<Mutex<Connection>>,
    max_versions: i64,
}

impl DiagramStore {
    /// Open or create a database file. The parent directory is created if
    /// it does not exist.
    pub fn open(path: impl AsRef<Path>, max_versions: i64) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.display(), max_versions, "diagram store opened");
        Ok(Self::from_connection(conn, max_versions))
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory(max_versions: i64) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self::from_connection(conn, max_versions))
    }

    fn from_connection(conn: Connection, max_versions: i64) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            max_versions,
        }
    }

    /// Retention cap per diagram; `<= 0` is unlimited.
    pub fn max_versions(&self) -> i64 {
        self.max_versions
    }

    /// Run blocking store work on tokio's blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&DiagramStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::internal(format!("store task failed: {}", e)))?
    }

    /// Run `f` inside one transaction. Any error rolls the whole thing back.
    fn with_tx<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Append a history entry and enforce the retention cap.
    fn record_version(
        &self,
        tx: &Transaction<'_>,
        meta: &DiagramMeta,
        raw: &str,
        action: VersionAction,
    ) -> Result<(), StoreError> {
        ledger::append(tx, &meta.id, &meta.name, raw, action)?;
        ledger::prune(tx, &meta.id, self.max_versions)?;
        Ok(())
    }

    // =========================================================================
    // Diagram writes
    // =========================================================================

    /// Insert a new diagram and its `create` version.
    pub fn create(&self, payload: Payload) -> Result<Payload, StoreError> {
        let (payload, meta) = normalize_payload(payload)?;
        let raw = serde_json::to_string(&payload)?;

        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO diagrams (id, name, database_type, database_edition, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    meta.id,
                    meta.name,
                    meta.database_type,
                    meta.database_edition,
                    raw,
                    meta.created_at,
                    meta.updated_at,
                ],
            )
            .map_err(|e| on_conflict(e.into(), "diagram already exists"))?;
            self.record_version(tx, &meta, &raw, VersionAction::Create)
        })?;

        info!(diagram_id = %meta.id, "diagram created");
        Ok(payload)
    }

    /// Overwrite a diagram wholesale. The payload's id must equal `target_id`.
    pub fn replace(&self, target_id: &str, payload: Payload) -> Result<Payload, StoreError> {
        let (payload, meta) = normalize_payload(payload)?;
        if meta.id != target_id {
            return Err(StoreError::validation(
                "diagram id in payload must match route id",
            ));
        }
        let raw = serde_json::to_string(&payload)?;

        self.with_tx(|tx| {
            update_in_place(tx, target_id, &meta, &raw)?;
            self.record_version(tx, &meta, &raw, VersionAction::Save)
        })?;

        debug!(diagram_id = target_id, "diagram replaced");
        Ok(payload)
    }

    /// Shallow-merge `partial` into the stored diagram.
    ///
    /// A changed `id` renames the diagram and moves its history and filter
    /// along. A partial made of `updatedAt` alone is a touch and records no
    /// version.
    pub fn patch(&self, target_id: &str, partial: Payload) -> Result<Payload, StoreError> {
        let touch_only = is_touch_only(&partial);

        let (payload, meta) = self.with_tx(|tx| {
            let mut current = load_payload(tx, target_id)?
                .ok_or_else(|| StoreError::not_found("diagram not found"))?;
            merge_patch(&mut current, &partial);
            if !current.contains_key("updatedAt") {
                current.insert("updatedAt".into(), now_timestamp().into());
            }

            let (payload, mut meta) = normalize_payload(current)?;
            if meta.id.is_empty() {
                meta.id = target_id.to_string();
            }
            let raw = serde_json::to_string(&payload)?;

            if meta.id == target_id {
                update_in_place(tx, target_id, &meta, &raw)?;
            } else {
                let affected = tx
                    .execute(
                        "UPDATE diagrams
                         SET id = ?1, name = ?2, database_type = ?3, database_edition = ?4, payload = ?5, updated_at = ?6
                         WHERE id = ?7",
                        params![
                            meta.id,
                            meta.name,
                            meta.database_type,
                            meta.database_edition,
                            raw,
                            meta.updated_at,
                            target_id,
                        ],
                    )
                    .map_err(|e| on_conflict(e.into(), "diagram id already exists"))?;
                if affected == 0 {
                    return Err(StoreError::not_found("diagram not found"));
                }
                let versions = ledger::rename(tx, target_id, &meta.id)?;
                let filters = filters::rename(tx, target_id, &meta.id)?;
                info!(from = target_id, to = %meta.id, versions, filters, "diagram renamed");
            }

            if !touch_only {
                self.record_version(tx, &meta, &raw, VersionAction::Patch)?;
            }
            Ok((payload, meta))
        })?;

        debug!(diagram_id = %meta.id, touch_only, "diagram patched");
        Ok(payload)
    }

    /// Remove a diagram with its history and filter. Missing ids succeed.
    pub fn delete(&self, diagram_id: &str) -> Result<(), StoreError> {
        let removed = self.with_tx(|tx| {
            filters::delete(tx, diagram_id)?;
            ledger::delete_all(tx, diagram_id)?;
            Ok(tx.execute("DELETE FROM diagrams WHERE id = ?1", params![diagram_id])?)
        })?;
        if removed > 0 {
            info!(diagram_id, "diagram deleted");
        }
        Ok(())
    }

    /// Roll a diagram back to a stored version. The restored payload keeps
    /// the diagram's id and gets a fresh `updatedAt`.
    pub fn restore(&self, diagram_id: &str, version_id: i64) -> Result<Payload, StoreError> {
        let payload = self.with_tx(|tx| {
            let mut snapshot = ledger::payload(tx, diagram_id, version_id)?
                .ok_or_else(|| StoreError::not_found("version not found"))?;
            snapshot.insert("id".into(), diagram_id.into());
            snapshot.insert("updatedAt".into(), now_timestamp().into());

            let (payload, meta) = normalize_payload(snapshot)?;
            let raw = serde_json::to_string(&payload)?;
            update_in_place(tx, diagram_id, &meta, &raw)?;
            self.record_version(tx, &meta, &raw, VersionAction::Restore)?;
            Ok(payload)
        })?;

        info!(diagram_id, version_id, "diagram restored");
        Ok(payload)
    }

    // =========================================================================
    // Diagram reads
    // =========================================================================

    pub fn get(&self, diagram_id: &str) -> Result<Payload, StoreError> {
        load_payload(&self.conn.lock(), diagram_id)?
            .ok_or_else(|| StoreError::not_found("diagram not found"))
    }

    /// Summary fields of every diagram, most recently updated first.
    pub fn list_metas(&self) -> Result<Vec<DiagramMeta>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, database_type, database_edition, created_at, updated_at
             FROM diagrams
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DiagramMeta {
                id: row.get(0)?,
                name: row.get(1)?,
                database_type: row.get(2)?,
                database_edition: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Full payloads of every diagram, most recently updated first.
    pub fn list_full(&self) -> Result<Vec<Payload>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT payload FROM diagrams ORDER BY updated_at DESC")?;
        let raws = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.iter()
            .map(|raw| serde_json::from_str(raw).map_err(StoreError::from))
            .collect()
    }

    // =========================================================================
    // History reads
    // =========================================================================

    /// Version summaries of a diagram, newest first.
    pub fn list_versions(&self, diagram_id: &str) -> Result<Vec<VersionSummary>, StoreError> {
        ledger::list(&self.conn.lock(), diagram_id)
    }

    pub fn get_version_payload(
        &self,
        diagram_id: &str,
        version_id: i64,
    ) -> Result<Payload, StoreError> {
        ledger::payload(&self.conn.lock(), diagram_id, version_id)?
            .ok_or_else(|| StoreError::not_found("version not found"))
    }
}

fn load_payload(conn: &Connection, diagram_id: &str) -> Result<Option<Payload>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT payload FROM diagrams WHERE id = ?1",
            params![diagram_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn update_in_place(
    conn: &Connection,
    diagram_id: &str,
    meta: &DiagramMeta,
    raw: &str,
) -> Result<(), StoreError> {
    let affected = conn.execute(
        "UPDATE diagrams
         SET name = ?1, database_type = ?2, database_edition = ?3, payload = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            meta.name,
            meta.database_type,
            meta.database_edition,
            raw,
            meta.updated_at,
            diagram_id,
        ],
    )?;
    if affected == 0 {
        return Err(StoreError::not_found("diagram not found"));
    }
    Ok(())
}

/// Give a unique-key violation a caller-facing message.
fn on_conflict(err: StoreError, message: &str) -> StoreError {
    match err {
        StoreError::Conflict(_) => StoreError::conflict(message),
        other => other,
    }
}
