//! Diagram documents.
//!
//! The store treats a diagram as an opaque JSON object with three required
//! top-level fields (`id`, `name`, `databaseType`). Everything else,
//! including the six nested collections, is carried through untouched.
//!
//! `Diagram` is the typed view used by the coordinator: the required fields
//! are explicit, everything else (timestamps and `databaseEdition`
//! included) stays in an untyped map and round-trips exactly.
//!
//! ## Example
//!
//! ```ignore
//! use diagram_ledger::{normalize_payload, parse_payload};
//!
//! let raw = parse_payload(br#"{"id":"d1","name":"Shop","databaseType":"postgresql"}"#)?;
//! let (payload, meta) = normalize_payload(raw)?;
//! assert_eq!(meta.id, "d1");
//! assert!(payload.contains_key("createdAt"));
//! ```

mod normalize;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

pub use normalize::{is_touch_only, merge_patch, normalize_payload, now_timestamp, parse_payload};

/// A raw diagram payload: one JSON object.
pub type Payload = Map<String, Value>;

/// Summary fields of a stored diagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramMeta {
    pub id: String,
    pub name: String,
    pub database_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_edition: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// The nested collection kinds a diagram carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Table,
    Relationship,
    Dependency,
    Area,
    CustomType,
    Note,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Table,
        EntityKind::Relationship,
        EntityKind::Dependency,
        EntityKind::Area,
        EntityKind::CustomType,
        EntityKind::Note,
    ];

    /// Top-level payload key holding this collection.
    pub fn collection_key(&self) -> &'static str {
        match self {
            EntityKind::Table => "tables",
            EntityKind::Relationship => "relationships",
            EntityKind::Dependency => "dependencies",
            EntityKind::Area => "areas",
            EntityKind::CustomType => "customTypes",
            EntityKind::Note => "notes",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Table => "table",
            EntityKind::Relationship => "relationship",
            EntityKind::Dependency => "dependency",
            EntityKind::Area => "area",
            EntityKind::CustomType => "custom type",
            EntityKind::Note => "note",
        }
    }

    /// Listings of these kinds are presented sorted by name.
    pub fn sorted_by_name(&self) -> bool {
        matches!(self, EntityKind::Relationship | EntityKind::CustomType)
    }
}

/// Typed view of a diagram document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagram {
    pub id: String,
    pub name: String,
    pub database_type: String,
    /// Everything else: timestamps, nested collections and any
    /// caller-defined keys, as stored.
    #[serde(flatten)]
    pub content: Payload,
}

impl Diagram {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        database_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            database_type: database_type.into(),
            content: Payload::new(),
        }
    }

    pub fn from_payload(payload: Payload) -> Result<Self, StoreError> {
        serde_json::from_value(Value::Object(payload))
            .map_err(|e| StoreError::validation(format!("invalid diagram: {}", e)))
    }

    pub fn to_payload(&self) -> Result<Payload, StoreError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::internal("diagram did not serialize to an object")),
        }
    }

    pub fn created_at(&self) -> Option<&str> {
        self.content.get("createdAt").and_then(Value::as_str)
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.content.get("updatedAt").and_then(Value::as_str)
    }

    /// Items of one nested collection, empty when the collection is absent.
    pub fn entities(&self, kind: EntityKind) -> &[Value] {
        self.content
            .get(kind.collection_key())
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Mutable items of one nested collection, created on first use.
    pub fn entities_mut(&mut self, kind: EntityKind) -> &mut Vec<Value> {
        let slot = self
            .content
            .entry(kind.collection_key())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !slot.is_array() {
            *slot = Value::Array(Vec::new());
        }
        match slot {
            Value::Array(items) => items,
            _ => unreachable!("slot was just set to an array"),
        }
    }

    pub fn entity_ids(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.entities(kind).iter().filter_map(entity_id)
    }

    pub fn find_entity(&self, kind: EntityKind, id: &str) -> Option<&Value> {
        self.entities(kind)
            .iter()
            .find(|item| entity_id(item) == Some(id))
    }

    pub fn contains_entity(&self, kind: EntityKind, id: &str) -> bool {
        self.find_entity(kind, id).is_some()
    }
}

/// The `id` of a nested item, if it has a string one.
pub fn entity_id(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}
