//! Append-only version history with a per-diagram retention cap.
//!
//! Every function here runs against a connection that is already inside a
//! transaction, so an append and its prune always commit together.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diagram::{now_timestamp, Payload};
use crate::error::StoreError;

/// What produced a version entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionAction {
    Create,
    Save,
    Patch,
    Restore,
}

impl VersionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionAction::Create => "create",
            VersionAction::Save => "save",
            VersionAction::Patch => "patch",
            VersionAction::Restore => "restore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(VersionAction::Create),
            "save" => Some(VersionAction::Save),
            "patch" => Some(VersionAction::Patch),
            "restore" => Some(VersionAction::Restore),
            _ => None,
        }
    }
}

impl ToSql for VersionAction {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for VersionAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        VersionAction::parse(s).ok_or(FromSqlError::InvalidType)
    }
}

/// Version listing entry (no payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: i64,
    pub diagram_id: String,
    pub name: String,
    pub action: VersionAction,
    pub created_at: String,
}

/// Append one snapshot. Returns the ledger-assigned version id.
pub(crate) fn append(
    conn: &Connection,
    diagram_id: &str,
    name: &str,
    payload: &str,
    action: VersionAction,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO diagram_versions (diagram_id, name, payload, action, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![diagram_id, name, payload, action, now_timestamp()],
    )?;
    let version_id = conn.last_insert_rowid();
    debug!(diagram_id, version_id, action = action.as_str(), "version appended");
    Ok(version_id)
}

/// Drop everything but the `keep` newest versions of a diagram.
/// `keep <= 0` means unlimited history. Returns the number pruned.
pub(crate) fn prune(conn: &Connection, diagram_id: &str, keep: i64) -> Result<usize, StoreError> {
    if keep <= 0 {
        return Ok(0);
    }
    let pruned = conn.execute(
        "DELETE FROM diagram_versions
         WHERE id IN (
             SELECT id FROM diagram_versions
             WHERE diagram_id = ?1
             ORDER BY id DESC
             LIMIT -1 OFFSET ?2
         )",
        params![diagram_id, keep],
    )?;
    if pruned > 0 {
        debug!(diagram_id, pruned, keep, "versions pruned");
    }
    Ok(pruned)
}

/// Move every version of `from` under `to`.
pub(crate) fn rename(conn: &Connection, from: &str, to: &str) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "UPDATE diagram_versions SET diagram_id = ?1 WHERE diagram_id = ?2",
        params![to, from],
    )?)
}

pub(crate) fn delete_all(conn: &Connection, diagram_id: &str) -> Result<usize, StoreError> {
    Ok(conn.execute(
        "DELETE FROM diagram_versions WHERE diagram_id = ?1",
        params![diagram_id],
    )?)
}

/// Summaries for one diagram, newest first.
pub(crate) fn list(conn: &Connection, diagram_id: &str) -> Result<Vec<VersionSummary>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, diagram_id, name, action, created_at
         FROM diagram_versions
         WHERE diagram_id = ?1
         ORDER BY id DESC",
    )?;
    let rows = stmt.query_map(params![diagram_id], |row| {
        Ok(VersionSummary {
            id: row.get(0)?,
            diagram_id: row.get(1)?,
            name: row.get(2)?,
            action: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Payload of one version, `None` if the (diagram, version) pair is unknown.
pub(crate) fn payload(
    conn: &Connection,
    diagram_id: &str,
    version_id: i64,
) -> Result<Option<Payload>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT payload FROM diagram_versions WHERE diagram_id = ?1 AND id = ?2",
            params![diagram_id, version_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
