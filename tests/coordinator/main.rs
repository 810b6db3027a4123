//! MutationCoordinator integration tests: per-diagram ordering, failure
//! isolation, owner resolution and the entity helpers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diagram_ledger::{
    Diagram, DiagramSource, DiagramStore, EntityKind, MutationCoordinator, Payload, StoreError,
};
use serde_json::{json, Value};

fn object(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A store that yields between reading and writing, so unserialized
/// read-modify-write cycles would interleave and lose updates.
#[derive(Clone)]
struct SlowStore {
    inner: DiagramStore,
    delay: Duration,
    /// How long a full listing sits on its snapshot before returning.
    list_delay: Duration,
    gets: Arc<AtomicUsize>,
}

impl SlowStore {
    fn new(inner: DiagramStore) -> Self {
        Self {
            inner,
            delay: Duration::from_millis(10),
            list_delay: Duration::ZERO,
            gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_list_delay(mut self, list_delay: Duration) -> Self {
        self.list_delay = list_delay;
        self
    }
}

#[async_trait]
impl DiagramSource for SlowStore {
    async fn get(&self, diagram_id: &str) -> Result<Payload, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.get(diagram_id)
    }

    async fn create(&self, payload: Payload) -> Result<Payload, StoreError> {
        self.inner.create(payload)
    }

    async fn replace(&self, diagram_id: &str, payload: Payload) -> Result<Payload, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.replace(diagram_id, payload)
    }

    async fn delete(&self, diagram_id: &str) -> Result<(), StoreError> {
        self.inner.delete(diagram_id)
    }

    async fn list_full(&self) -> Result<Vec<Payload>, StoreError> {
        let snapshot = self.inner.list_full();
        tokio::time::sleep(self.list_delay).await;
        snapshot
    }
}

async fn coordinator_with(diagrams: &[&str]) -> MutationCoordinator<DiagramStore> {
    let coordinator = MutationCoordinator::new(DiagramStore::in_memory(100).unwrap());
    for id in diagrams {
        coordinator
            .create_diagram(Diagram::new(*id, id.to_uppercase(), "generic"))
            .await
            .unwrap();
    }
    coordinator
}

fn ids(items: &[Value]) -> Vec<&str> {
    items.iter().filter_map(|item| item["id"].as_str()).collect()
}

#[tokio::test]
async fn concurrent_adds_both_apply() {
    let store = DiagramStore::in_memory(100).unwrap();
    store
        .create(object(json!({ "id": "d1", "name": "N", "databaseType": "generic" })))
        .unwrap();
    let coordinator = MutationCoordinator::new(SlowStore::new(store.clone()));

    let (a, b) = tokio::join!(
        coordinator.add_table("d1", json!({ "id": "A", "name": "a" })),
        coordinator.add_table("d1", json!({ "id": "B", "name": "b" })),
    );
    a.unwrap();
    b.unwrap();

    let stored = store.get("d1").unwrap();
    assert_eq!(stored["tables"], json!([{ "id": "A", "name": "a" }, { "id": "B", "name": "b" }]));
    assert_eq!(store.list_versions("d1").unwrap().len(), 3);
}

#[tokio::test]
async fn spawned_mutations_all_apply() {
    let coordinator = Arc::new(coordinator_with(&["d1"]).await);

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .mutate("d1", move |diagram| {
                        diagram
                            .entities_mut(EntityKind::Note)
                            .push(json!({ "id": format!("n{i}") }));
                        Ok(())
                    })
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let notes = coordinator.list_notes("d1").await.unwrap();
    let mut seen = ids(&notes);
    seen.sort();
    assert_eq!(seen, vec!["n0", "n1", "n2", "n3", "n4"]);
}

#[tokio::test]
async fn order_is_taken_when_mutate_is_called() {
    let coordinator = coordinator_with(&["d1"]).await;

    let first = coordinator.mutate("d1", |diagram| {
        diagram.entities_mut(EntityKind::Note).push(json!({ "id": "first" }));
        Ok(())
    });
    let second = coordinator.mutate("d1", |diagram| {
        // sees the first write
        assert_eq!(diagram.entities(EntityKind::Note).len(), 1);
        diagram.entities_mut(EntityKind::Note).push(json!({ "id": "second" }));
        Ok(())
    });

    // poll the later one first
    let (second, first) = tokio::join!(second, first);
    first.unwrap();
    let saved = second.unwrap();
    assert_eq!(ids(saved.entities(EntityKind::Note)), vec!["first", "second"]);
}

#[tokio::test]
async fn failed_mutation_does_not_block_the_next() {
    let coordinator = coordinator_with(&["d1"]).await;

    let failing = coordinator.mutate("d1", |_| Err(StoreError::validation("rejected")));
    let next = coordinator.add_area("d1", json!({ "id": "a1", "name": "zone" }));

    let (failed, added) = tokio::join!(failing, next);
    assert_eq!(failed.unwrap_err(), StoreError::validation("rejected"));
    assert_eq!(added.unwrap()["id"], json!("a1"));
    assert!(!coordinator.queue().is_pending("d1"));
    // the failed cycle wrote nothing
    assert_eq!(coordinator.source().list_versions("d1").unwrap().len(), 2);
}

#[tokio::test]
async fn other_diagrams_do_not_wait() {
    let coordinator = coordinator_with(&["d1", "d2"]).await;

    // hold d1's turn
    let mut held = coordinator.queue().enqueue("d1");
    held.ready().await;

    let blocked = coordinator.add_table("d1", json!({ "id": "t0" }));
    let other = tokio::time::timeout(
        Duration::from_millis(500),
        coordinator.add_table("d2", json!({ "id": "t1" })),
    )
    .await;
    assert!(other.expect("d2 must not wait on d1").is_ok());
    assert!(tokio::time::timeout(Duration::from_millis(50), blocked)
        .await
        .is_err());

    drop(held);
    coordinator
        .add_table("d1", json!({ "id": "t2" }))
        .await
        .unwrap();
    assert_eq!(ids(&coordinator.list_tables("d1").await.unwrap()), vec!["t2"]);
}

#[tokio::test]
async fn resolve_owner_falls_back_to_full_listing() {
    let store = DiagramStore::in_memory(100).unwrap();
    store
        .create(object(json!({
            "id": "d1", "name": "N", "databaseType": "generic",
            "relationships": [{ "id": "r1", "name": "fk" }]
        })))
        .unwrap();
    store
        .create(object(json!({
            "id": "d2", "name": "M", "databaseType": "generic",
            "tables": [{ "id": "t9", "name": "x" }]
        })))
        .unwrap();
    let coordinator = MutationCoordinator::new(store);
    assert!(coordinator.cache().is_empty());

    let owner = coordinator
        .resolve_owner("r1", EntityKind::Relationship)
        .await
        .unwrap();
    assert_eq!(owner, "d1");
    assert_eq!(coordinator.cache().len(), 2);
    assert_eq!(
        coordinator.cache().owner_of(EntityKind::Table, "t9").as_deref(),
        Some("d2")
    );

    let err = coordinator
        .resolve_owner("t9", EntityKind::Note)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn cached_reads_skip_the_source() {
    let store = DiagramStore::in_memory(100).unwrap();
    store
        .create(object(json!({ "id": "d1", "name": "N", "databaseType": "generic" })))
        .unwrap();
    let source = SlowStore::new(store);
    let gets = source.gets.clone();
    let coordinator = MutationCoordinator::new(source);

    let mut first = coordinator.get_diagram("d1").await.unwrap();
    first.name = "local edit".into();
    let second = coordinator.get_diagram("d1").await.unwrap();

    assert_eq!(second.name, "N");
    assert_eq!(gets.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn entity_helpers_round_trip() {
    let coordinator = coordinator_with(&["d1", "d2"]).await;

    coordinator
        .add_table("d1", json!({ "id": "t1", "name": "orders" }))
        .await
        .unwrap();
    coordinator
        .add_dependency("d2", json!({ "id": "dep1", "tableId": "t1" }))
        .await
        .unwrap();

    let updated = coordinator
        .update_table("t1", object(json!({ "name": "purchases", "x": 10 })))
        .await
        .unwrap();
    assert_eq!(updated, json!({ "id": "t1", "name": "purchases", "x": 10 }));
    assert_eq!(coordinator.get_table("t1").await.unwrap()["name"], json!("purchases"));
    assert_eq!(coordinator.get_dependency("dep1").await.unwrap()["tableId"], json!("t1"));

    coordinator.delete_table("t1").await.unwrap();
    assert!(coordinator.get_table("t1").await.unwrap_err().is_not_found());
    assert!(coordinator.list_tables("d1").await.unwrap().is_empty());

    let stored = coordinator.source().get("d1").unwrap();
    assert_eq!(stored["tables"], json!([]));
}

#[tokio::test]
async fn sorted_listings() {
    let coordinator = coordinator_with(&["d1"]).await;
    for (id, name) in [("r1", "orders_users"), ("r2", "accounts_users"), ("r3", "lines_orders")] {
        coordinator
            .add_relationship("d1", json!({ "id": id, "name": name }))
            .await
            .unwrap();
    }
    let names: Vec<String> = coordinator
        .list_relationships("d1")
        .await
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["accounts_users", "lines_orders", "orders_users"]);

    // stored order is untouched
    let stored = coordinator.get_diagram("d1").await.unwrap();
    assert_eq!(ids(stored.entities(EntityKind::Relationship)), vec!["r1", "r2", "r3"]);
}

#[tokio::test]
async fn update_diagram_merges_top_level() {
    let coordinator = coordinator_with(&["d1"]).await;
    let updated = coordinator
        .update_diagram("d1", object(json!({ "name": "Renamed", "zoom": 2 })))
        .await
        .unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.content["zoom"], json!(2));

    // an id change cannot go through replace
    let err = coordinator
        .update_diagram("d1", object(json!({ "id": "d9" })))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn delete_clears_cache_index_and_queue() {
    let coordinator = coordinator_with(&["d1"]).await;
    coordinator
        .add_custom_type("d1", json!({ "id": "c1", "name": "money" }))
        .await
        .unwrap();
    assert_eq!(
        coordinator.cache().owner_of(EntityKind::CustomType, "c1").as_deref(),
        Some("d1")
    );

    let add = coordinator.add_note("d1", json!({ "id": "n1" }));
    let delete = coordinator.delete_diagram("d1");
    let (added, deleted) = tokio::join!(delete, add);
    deleted.unwrap();
    // the add was queued first, so it landed before the delete
    added.unwrap();

    assert!(!coordinator.cache().contains("d1"));
    assert_eq!(coordinator.cache().owner_of(EntityKind::CustomType, "c1"), None);
    assert!(!coordinator.queue().is_pending("d1"));
    assert!(coordinator.get_diagram("d1").await.unwrap_err().is_not_found());

    // a fresh start under the same id
    coordinator
        .create_diagram(Diagram::new("d1", "Again", "generic"))
        .await
        .unwrap();
    assert!(coordinator.list_custom_types("d1").await.unwrap().is_empty());
}

#[tokio::test]
async fn mutate_on_missing_diagram_is_not_found() {
    let coordinator = coordinator_with(&[]).await;
    let err = coordinator
        .add_table("ghost", json!({ "id": "t1" }))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(!coordinator.queue().is_pending("ghost"));
}

#[tokio::test]
async fn slow_owner_lookup_does_not_undo_a_queued_write() {
    let store = DiagramStore::in_memory(100).unwrap();
    store
        .create(object(json!({ "id": "d1", "name": "N", "databaseType": "generic" })))
        .unwrap();
    let coordinator = MutationCoordinator::new(
        SlowStore::new(store.clone()).with_list_delay(Duration::from_millis(100)),
    );

    // the lookup lists d1 before table A exists and returns after A is saved
    let (missing, added) = tokio::join!(
        coordinator.resolve_owner("ghost", EntityKind::Note),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.add_table("d1", json!({ "id": "A" })).await
        },
    );
    assert!(missing.unwrap_err().is_not_found());
    added.unwrap();

    coordinator.add_table("d1", json!({ "id": "B" })).await.unwrap();
    assert_eq!(store.get("d1").unwrap()["tables"], json!([{ "id": "A" }, { "id": "B" }]));
    assert_eq!(
        coordinator.cache().owner_of(EntityKind::Table, "A").as_deref(),
        Some("d1")
    );
}

#[tokio::test]
async fn slow_listing_does_not_replace_a_cached_write() {
    let store = DiagramStore::in_memory(100).unwrap();
    store
        .create(object(json!({ "id": "d1", "name": "N", "databaseType": "generic" })))
        .unwrap();
    let coordinator = MutationCoordinator::new(
        SlowStore::new(store.clone()).with_list_delay(Duration::from_millis(100)),
    );
    coordinator.get_diagram("d1").await.unwrap();

    let (listed, added) = tokio::join!(coordinator.list_diagrams(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.add_note("d1", json!({ "id": "n1" })).await
    });
    // the listing itself reports what it read
    assert!(listed.unwrap()[0].entities(EntityKind::Note).is_empty());
    added.unwrap();

    let cached = coordinator.cache().get("d1").unwrap();
    assert_eq!(ids(cached.entities(EntityKind::Note)), vec!["n1"]);

    coordinator.add_note("d1", json!({ "id": "n2" })).await.unwrap();
    assert_eq!(store.get("d1").unwrap()["notes"], json!([{ "id": "n1" }, { "id": "n2" }]));
}

#[tokio::test]
async fn optional_top_level_fields_pass_through_untouched() {
    let store = DiagramStore::in_memory(100).unwrap();
    store
        .create(object(json!({
            "id": "d1", "name": "N", "databaseType": "generic", "databaseEdition": null
        })))
        .unwrap();
    store
        .create(object(json!({
            "id": "d2", "name": "M", "databaseType": "mysql", "databaseEdition": 5,
            "tables": [{ "id": "t5" }]
        })))
        .unwrap();
    let coordinator = MutationCoordinator::new(store.clone());

    // an odd edition on d2 must not break lookups across all diagrams
    assert_eq!(
        coordinator.resolve_owner("t5", EntityKind::Table).await.unwrap(),
        "d2"
    );
    assert_eq!(
        coordinator.get_diagram("d2").await.unwrap().content["databaseEdition"],
        json!(5)
    );

    coordinator.add_table("d1", json!({ "id": "t1" })).await.unwrap();
    coordinator.add_table("d2", json!({ "id": "t6" })).await.unwrap();
    assert_eq!(store.get("d1").unwrap().get("databaseEdition"), Some(&Value::Null));
    assert_eq!(store.get("d2").unwrap()["databaseEdition"], json!(5));
}
