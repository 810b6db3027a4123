use async_trait::async_trait;

use crate::diagram::Payload;
use crate::error::StoreError;
use crate::store::DiagramStore;

/// The store operations the coordinator needs.
///
/// `DiagramStore` implements this directly; `HttpDiagramClient` implements
/// it over the HTTP surface. Both surface the same `StoreError` kinds.
#[async_trait]
pub trait DiagramSource: Send + Sync {
    async fn get(&self, diagram_id: &str) -> Result<Payload, StoreError>;

    async fn create(&self, payload: Payload) -> Result<Payload, StoreError>;

    async fn replace(&self, diagram_id: &str, payload: Payload) -> Result<Payload, StoreError>;

    async fn delete(&self, diagram_id: &str) -> Result<(), StoreError>;

    async fn list_full(&self) -> Result<Vec<Payload>, StoreError>;
}

#[async_trait]
impl DiagramSource for DiagramStore {
    async fn get(&self, diagram_id: &str) -> Result<Payload, StoreError> {
        let diagram_id = diagram_id.to_string();
        self.run(move |store| store.get(&diagram_id)).await
    }

    async fn create(&self, payload: Payload) -> Result<Payload, StoreError> {
        self.run(move |store| store.create(payload)).await
    }

    async fn replace(&self, diagram_id: &str, payload: Payload) -> Result<Payload, StoreError> {
        let diagram_id = diagram_id.to_string();
        self.run(move |store| store.replace(&diagram_id, payload))
            .await
    }

    async fn delete(&self, diagram_id: &str) -> Result<(), StoreError> {
        let diagram_id = diagram_id.to_string();
        self.run(move |store| store.delete(&diagram_id)).await
    }

    async fn list_full(&self) -> Result<Vec<Payload>, StoreError> {
        self.run(|store| store.list_full()).await
    }
}
