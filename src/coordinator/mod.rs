//! MutationCoordinator - serialized read-modify-write cycles per diagram.
//!
//! Sits above a `DiagramSource` (the local store or a remote one), keeps
//! copies of fetched diagrams in a `DiagramCache`, resolves nested entity
//! ids to their owning diagram through the owner index, and runs every
//! write for one diagram id strictly one after another in submission
//! order. A failed operation is reported to its own caller and never
//! blocks the operations queued behind it.
//!
//! Serialization is one FIFO chain per diagram id (`KeyedQueue`); waiting
//! never parks a thread.
//!
//! ## Example
//!
//! ```ignore
//! use diagram_ledger::{DiagramStore, MutationCoordinator};
//! use serde_json::json;
//!
//! let coordinator = MutationCoordinator::new(DiagramStore::in_memory(100)?);
//! coordinator.add_table("d1", json!({"id": "t1", "name": "orders"})).await?;
//! coordinator.update_table("t1", attrs).await?; // owner resolved from "t1"
//! ```

mod cache;
mod entities;
mod queue;
mod source;

use std::future::Future;

use tracing::{info, warn};

use crate::diagram::{merge_patch, Diagram, EntityKind, Payload};
use crate::error::StoreError;

pub use cache::{DiagramCache, OwnerIndex, ReadTicket};
pub use queue::{KeyedQueue, QueueSlot};
pub use source::DiagramSource;

/// Cache, owner index and per-diagram queue over one `DiagramSource`.
pub struct MutationCoordinator<S> {
    source: S,
    cache: DiagramCache,
    queue: KeyedQueue,
}

impl<S: DiagramSource> MutationCoordinator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: DiagramCache::new(),
            queue: KeyedQueue::new(),
        }
    }

    /// Access the underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cache(&self) -> &DiagramCache {
        &self.cache
    }

    pub fn queue(&self) -> &KeyedQueue {
        &self.queue
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// A copy of the diagram, from the cache or fetched and cached.
    ///
    /// Does not wait for queued work: a fetch racing a pending mutation may
    /// see either side of it, but only caches its copy when no write for
    /// the diagram committed while it was out.
    pub async fn fetch(&self, diagram_id: &str) -> Result<Diagram, StoreError> {
        if let Some(diagram) = self.cache.get(diagram_id) {
            return Ok(diagram);
        }
        let read = self.cache.begin_read();
        let diagram = Diagram::from_payload(self.source.get(diagram_id).await?)?;
        read.offer(diagram.clone());
        Ok(diagram)
    }

    pub async fn get_diagram(&self, diagram_id: &str) -> Result<Diagram, StoreError> {
        self.fetch(diagram_id).await
    }

    /// Full listing from the source. Returned diagrams are (re)cached
    /// unless a queued write committed a newer copy during the listing.
    pub async fn list_diagrams(&self) -> Result<Vec<Diagram>, StoreError> {
        let read = self.cache.begin_read();
        let payloads = self.source.list_full().await?;
        payloads
            .into_iter()
            .map(|payload| {
                let diagram = Diagram::from_payload(payload)?;
                read.offer(diagram.clone());
                Ok(diagram)
            })
            .collect()
    }

    /// Id of the diagram holding a nested entity.
    ///
    /// Tries the owner index, then a scan of cached diagrams, then a full
    /// listing from the source.
    pub async fn resolve_owner(
        &self,
        entity_id: &str,
        kind: EntityKind,
    ) -> Result<String, StoreError> {
        if let Some(owner) = self.cache.owner_of(kind, entity_id) {
            return Ok(owner);
        }
        if let Some(owner) = self.cache.scan(kind, entity_id) {
            return Ok(owner);
        }

        self.list_diagrams().await?;
        self.cache
            .owner_of(kind, entity_id)
            .or_else(|| self.cache.scan(kind, entity_id))
            .ok_or_else(|| StoreError::not_found(format!("{} {} not found", kind.as_str(), entity_id)))
    }

    // =========================================================================
    // Queued writes
    // =========================================================================

    /// Edit a diagram in place and persist it.
    ///
    /// The position in the diagram's queue is taken when this is called.
    /// When its turn comes, the mutator receives a fresh copy (so it sees
    /// every earlier queued write), the result is written back with a
    /// replace, and the persisted diagram is re-cached. A mutator error
    /// aborts before anything is written.
    pub fn mutate<'a, F>(
        &'a self,
        diagram_id: &str,
        mutator: F,
    ) -> impl Future<Output = Result<Diagram, StoreError>> + Send + 'a
    where
        F: FnOnce(&mut Diagram) -> Result<(), StoreError> + Send + 'a,
    {
        let id = diagram_id.to_string();
        self.in_queue(diagram_id, async move { self.apply(&id, mutator).await })
    }

    /// Create a diagram through the source and cache the stored result.
    pub fn create_diagram<'a>(
        &'a self,
        diagram: Diagram,
    ) -> impl Future<Output = Result<Diagram, StoreError>> + Send + 'a {
        let id = diagram.id.clone();
        self.in_queue(&id, async move {
            let saved = self.source.create(diagram.to_payload()?).await?;
            self.remember(saved)
        })
    }

    /// Shallow-merge top-level attributes into a diagram.
    pub fn update_diagram<'a>(
        &'a self,
        diagram_id: &str,
        attrs: Payload,
    ) -> impl Future<Output = Result<Diagram, StoreError>> + Send + 'a {
        self.mutate(diagram_id, move |diagram| {
            let mut payload = diagram.to_payload()?;
            merge_patch(&mut payload, &attrs);
            *diagram = Diagram::from_payload(payload)?;
            Ok(())
        })
    }

    /// Delete a diagram once the work queued before it has settled, then
    /// drop its cache and index entries.
    pub fn delete_diagram<'a>(
        &'a self,
        diagram_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + 'a {
        let id = diagram_id.to_string();
        self.in_queue(diagram_id, async move {
            self.source.delete(&id).await?;
            self.cache.remove(&id);
            info!(diagram_id = %id, "diagram deleted through coordinator");
            Ok(())
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Take a queue position now; run `work` when it comes up.
    fn in_queue<'a, T, Fut>(
        &'a self,
        diagram_id: &str,
        work: Fut,
    ) -> impl Future<Output = Result<T, StoreError>> + Send + 'a
    where
        Fut: Future<Output = Result<T, StoreError>> + Send + 'a,
        T: Send + 'a,
    {
        let mut slot = self.queue.enqueue(diagram_id);
        async move {
            slot.ready().await;
            let result = work.await;
            if let Err(err) = &result {
                warn!(diagram_id = slot.key(), error = %err, "queued operation failed");
            }
            result
        }
    }

    async fn apply<F>(&self, diagram_id: &str, mutator: F) -> Result<Diagram, StoreError>
    where
        F: FnOnce(&mut Diagram) -> Result<(), StoreError> + Send,
    {
        let mut diagram = self.fetch(diagram_id).await?;
        mutator(&mut diagram)?;

        match self.source.replace(diagram_id, diagram.to_payload()?).await {
            Ok(saved) => self.remember(saved),
            Err(err) => {
                if err.is_not_found() {
                    self.cache.remove(diagram_id);
                }
                Err(err)
            }
        }
    }

    /// Parse a payload a queued write just committed and cache it; returns
    /// a detached copy.
    fn remember(&self, payload: Payload) -> Result<Diagram, StoreError> {
        let diagram = Diagram::from_payload(payload)?;
        self.cache.insert(diagram.clone());
        Ok(diagram)
    }
}
