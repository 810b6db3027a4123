//! Global settings blob.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::DiagramStore;
use crate::diagram::Payload;
use crate::error::StoreError;

const CONFIG_KEY: &str = "config";

/// Keys every config read carries, with their defaults.
fn defaults() -> Payload {
    let mut map = Payload::new();
    map.insert("defaultDiagramId".into(), Value::String(String::new()));
    map
}

impl DiagramStore {
    /// Stored config merged over the defaults.
    pub fn get_config(&self) -> Result<Payload, StoreError> {
        load(&self.conn.lock())
    }

    /// Merge `update` over the current config, persist, and return the
    /// merged result. Keys not in `update` are left as they are.
    pub fn set_config(&self, update: Payload) -> Result<Payload, StoreError> {
        self.with_tx(|tx| {
            let mut config = load(tx)?;
            for (key, value) in update {
                config.insert(key, value);
            }
            let raw = serde_json::to_string(&config)?;
            tx.execute(
                "INSERT INTO settings (key, value)
                 VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![CONFIG_KEY, raw],
            )?;
            Ok(config)
        })
    }
}

fn load(conn: &Connection) -> Result<Payload, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![CONFIG_KEY],
            |row| row.get(0),
        )
        .optional()?;

    let mut config = defaults();
    if let Some(raw) = raw {
        let stored: Payload = serde_json::from_str(&raw)?;
        config.extend(stored);
    }
    Ok(config)
}
