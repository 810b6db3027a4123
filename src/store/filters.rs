//! Per-diagram filter side-table. At most one opaque filter per diagram id.

use rusqlite::{params, Connection, OptionalExtension};

use super::DiagramStore;
use crate::diagram::Payload;
use crate::error::StoreError;

impl DiagramStore {
    /// The filter stored for a diagram; `NotFound` if none is set.
    pub fn get_filter(&self, diagram_id: &str) -> Result<Payload, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload FROM diagram_filters WHERE diagram_id = ?1",
                params![diagram_id],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Err(StoreError::not_found("filter not found")),
        }
    }

    /// Insert or wholesale replace the filter for a diagram.
    pub fn set_filter(&self, diagram_id: &str, filter: Payload) -> Result<Payload, StoreError> {
        let raw = serde_json::to_string(&filter)?;
        self.conn.lock().execute(
            "INSERT INTO diagram_filters (diagram_id, payload)
             VALUES (?1, ?2)
             ON CONFLICT(diagram_id) DO UPDATE SET payload = excluded.payload",
            params![diagram_id, raw],
        )?;
        Ok(filter)
    }

    /// Remove the filter for a diagram. Removing a missing filter succeeds.
    pub fn delete_filter(&self, diagram_id: &str) -> Result<(), StoreError> {
        delete(&self.conn.lock(), diagram_id)?;
        Ok(())
    }
}

pub(crate) fn rename(conn: &Connection, from: &str, to: &str) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE diagram_filters SET diagram_id = ?1 WHERE diagram_id = ?2",
        params![to, from],
    )?)
}

pub(crate) fn delete(conn: &Connection, diagram_id: &str) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM diagram_filters WHERE diagram_id = ?1",
        params![diagram_id],
    )?)
}
