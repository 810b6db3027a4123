//! Nested entity operations.
//!
//! Adds are addressed by diagram id. Everything else is addressed by the
//! entity id alone and finds the owning diagram through `resolve_owner`.
//! Every write is a queued `mutate` on that diagram.

use std::future::Future;

use serde_json::Value;

use super::{DiagramSource, MutationCoordinator};
use crate::diagram::{entity_id, merge_patch, Diagram, EntityKind, Payload};
use crate::error::StoreError;

fn missing(kind: EntityKind, entity_id: &str) -> StoreError {
    StoreError::not_found(format!("{} {} not found", kind.as_str(), entity_id))
}

fn find_in(diagram: &Diagram, kind: EntityKind, entity_id: &str) -> Result<Value, StoreError> {
    diagram
        .find_entity(kind, entity_id)
        .cloned()
        .ok_or_else(|| missing(kind, entity_id))
}

fn name_of(item: &Value) -> &str {
    item.get("name").and_then(Value::as_str).unwrap_or("")
}

impl<S: DiagramSource> MutationCoordinator<S> {
    /// Append an item to one collection of a diagram.
    ///
    /// The item must be an object with a non-empty string `id` that is not
    /// already used in that collection. Returns the item as stored.
    pub fn add_entity<'a>(
        &'a self,
        diagram_id: &str,
        kind: EntityKind,
        item: Value,
    ) -> impl Future<Output = Result<Value, StoreError>> + Send + 'a {
        let new_id = entity_id(&item).unwrap_or_default().to_string();
        let pending = {
            let new_id = new_id.clone();
            self.mutate(diagram_id, move |diagram| {
                if !item.is_object() || new_id.is_empty() {
                    return Err(StoreError::validation(format!(
                        "{} id is required",
                        kind.as_str()
                    )));
                }
                if diagram.contains_entity(kind, &new_id) {
                    return Err(StoreError::conflict(format!(
                        "{} {} already exists",
                        kind.as_str(),
                        new_id
                    )));
                }
                diagram.entities_mut(kind).push(item);
                Ok(())
            })
        };

        async move {
            let saved = pending.await?;
            find_in(&saved, kind, &new_id)
        }
    }

    pub async fn get_entity(&self, kind: EntityKind, entity_id: &str) -> Result<Value, StoreError> {
        let owner = self.resolve_owner(entity_id, kind).await?;
        let diagram = self.fetch(&owner).await?;
        find_in(&diagram, kind, entity_id)
    }

    /// Shallow-merge attributes into an item. `null` values are skipped.
    pub async fn update_entity(
        &self,
        kind: EntityKind,
        target_id: &str,
        attrs: Payload,
    ) -> Result<Value, StoreError> {
        let owner = self.resolve_owner(target_id, kind).await?;
        let final_id = attrs
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(target_id)
            .to_string();

        let target = target_id.to_string();
        let saved = self
            .mutate(&owner, move |diagram| {
                let item = diagram
                    .entities_mut(kind)
                    .iter_mut()
                    .find(|item| entity_id(item) == Some(target.as_str()))
                    .ok_or_else(|| missing(kind, &target))?;
                if let Value::Object(fields) = item {
                    merge_patch(fields, &attrs);
                }
                Ok(())
            })
            .await?;

        find_in(&saved, kind, &final_id)
    }

    pub async fn delete_entity(&self, kind: EntityKind, target_id: &str) -> Result<(), StoreError> {
        let owner = self.resolve_owner(target_id, kind).await?;
        let target = target_id.to_string();
        self.mutate(&owner, move |diagram| {
            let items = diagram.entities_mut(kind);
            let before = items.len();
            items.retain(|item| entity_id(item) != Some(target.as_str()));
            if items.len() == before {
                return Err(missing(kind, &target));
            }
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Items of one collection. Relationships and custom types come back
    /// sorted by name, the rest in stored order.
    pub async fn list_entities(
        &self,
        diagram_id: &str,
        kind: EntityKind,
    ) -> Result<Vec<Value>, StoreError> {
        let diagram = self.fetch(diagram_id).await?;
        let mut items = diagram.entities(kind).to_vec();
        if kind.sorted_by_name() {
            items.sort_by(|a, b| name_of(a).cmp(name_of(b)));
        }
        Ok(items)
    }
}

// =============================================================================
// Named helpers per collection
// =============================================================================

macro_rules! entity_helpers {
    ($kind:expr, $label:literal, $add:ident, $get:ident, $update:ident, $delete:ident, $list:ident) => {
        #[doc = concat!("Add a ", $label, " to a diagram.")]
        pub fn $add<'a>(
            &'a self,
            diagram_id: &str,
            item: Value,
        ) -> impl Future<Output = Result<Value, StoreError>> + Send + 'a {
            self.add_entity(diagram_id, $kind, item)
        }

        #[doc = concat!("Find a ", $label, " by id in whichever diagram holds it.")]
        pub async fn $get(&self, entity_id: &str) -> Result<Value, StoreError> {
            self.get_entity($kind, entity_id).await
        }

        pub async fn $update(&self, entity_id: &str, attrs: Payload) -> Result<Value, StoreError> {
            self.update_entity($kind, entity_id, attrs).await
        }

        pub async fn $delete(&self, entity_id: &str) -> Result<(), StoreError> {
            self.delete_entity($kind, entity_id).await
        }

        pub async fn $list(&self, diagram_id: &str) -> Result<Vec<Value>, StoreError> {
            self.list_entities(diagram_id, $kind).await
        }
    };
}

impl<S: DiagramSource> MutationCoordinator<S> {
    entity_helpers!(EntityKind::Table, "table",
        add_table, get_table, update_table, delete_table, list_tables);
    entity_helpers!(EntityKind::Relationship, "relationship",
        add_relationship, get_relationship, update_relationship, delete_relationship, list_relationships);
    entity_helpers!(EntityKind::Dependency, "dependency",
        add_dependency, get_dependency, update_dependency, delete_dependency, list_dependencies);
    entity_helpers!(EntityKind::Area, "area",
        add_area, get_area, update_area, delete_area, list_areas);
    entity_helpers!(EntityKind::CustomType, "custom type",
        add_custom_type, get_custom_type, update_custom_type, delete_custom_type, list_custom_types);
    entity_helpers!(EntityKind::Note, "note",
        add_note, get_note, update_note, delete_note, list_notes);
}
