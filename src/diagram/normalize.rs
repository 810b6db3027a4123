use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use super::{DiagramMeta, Payload};
use crate::error::StoreError;

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a request body into a payload object.
pub fn parse_payload(bytes: &[u8]) -> Result<Payload, StoreError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(StoreError::validation("invalid json payload")),
    }
}

/// Validate the required fields and fill in missing timestamps.
///
/// Returns the normalized payload together with its summary fields.
/// `id`, `name` and `databaseType` must be strings that are not blank
/// after trimming; they are stored as given.
pub fn normalize_payload(mut data: Payload) -> Result<(Payload, DiagramMeta), StoreError> {
    let id = required(&data, "id")?;
    let name = required(&data, "name")?;
    let database_type = required(&data, "databaseType")?;

    let now = now_timestamp();
    let created_at = timestamp_or_fill(&mut data, "createdAt", &now);
    let updated_at = timestamp_or_fill(&mut data, "updatedAt", &now);

    let database_edition = data
        .get("databaseEdition")
        .and_then(Value::as_str)
        .map(str::to_string);

    let meta = DiagramMeta {
        id,
        name,
        database_type,
        database_edition,
        created_at,
        updated_at,
    };
    Ok((data, meta))
}

/// Shallow-merge `patch` over `current`. Only keys present in the patch
/// with a non-null value overwrite.
pub fn merge_patch(current: &mut Payload, patch: &Payload) {
    for (key, value) in patch {
        if value.is_null() {
            continue;
        }
        current.insert(key.clone(), value.clone());
    }
}

/// A patch consisting of exactly one key, `updatedAt`, is a timestamp
/// touch and does not earn a history entry.
pub fn is_touch_only(patch: &Payload) -> bool {
    patch.len() == 1 && patch.contains_key("updatedAt")
}

fn required(data: &Payload, key: &str) -> Result<String, StoreError> {
    match data.get(key).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(StoreError::validation(format!("diagram.{} is required", key))),
    }
}

fn timestamp_or_fill(data: &mut Payload, key: &str, now: &str) -> String {
    match data.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => {
            data.insert(key.to_string(), Value::String(now.to_string()));
            now.to_string()
        }
    }
}
