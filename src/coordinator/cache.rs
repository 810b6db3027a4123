//! DiagramCache - copies of fetched diagrams plus the owner index.
//!
//! The cache is an arena of copies, never the source of truth. The owner
//! index maps each nested entity id back to the diagram holding it, one
//! map per `EntityKind`; it is advisory and can always be rebuilt from a
//! full listing.
//!
//! Two kinds of writes reach the cache. `insert` and `remove` record what
//! a serialized write just committed and always apply. A read that ran
//! outside the queue goes through a `ReadTicket` instead: its result is
//! only cached if no committed write for that diagram landed after the
//! read began, so a slow read never puts an older copy back.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::diagram::{Diagram, EntityKind};

/// Reverse lookup from nested entity id to owning diagram id.
#[derive(Debug, Default)]
pub struct OwnerIndex {
    maps: [HashMap<String, String>; 6],
}

impl OwnerIndex {
    fn slot(kind: EntityKind) -> usize {
        match kind {
            EntityKind::Table => 0,
            EntityKind::Relationship => 1,
            EntityKind::Dependency => 2,
            EntityKind::Area => 3,
            EntityKind::CustomType => 4,
            EntityKind::Note => 5,
        }
    }

    pub fn get(&self, kind: EntityKind, entity_id: &str) -> Option<&str> {
        self.maps[Self::slot(kind)]
            .get(entity_id)
            .map(String::as_str)
    }

    pub fn insert(&mut self, kind: EntityKind, entity_id: &str, diagram_id: &str) {
        self.maps[Self::slot(kind)].insert(entity_id.to_string(), diagram_id.to_string());
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.maps[Self::slot(kind)].len()
    }

    /// Index every nested entity of a diagram.
    fn index(&mut self, diagram: &Diagram) {
        for kind in EntityKind::ALL {
            for entity_id in diagram.entity_ids(kind) {
                self.insert(kind, entity_id, &diagram.id);
            }
        }
    }

    /// Drop the entries a diagram contributed. Entries that have since been
    /// claimed by another diagram are left alone.
    fn unindex(&mut self, diagram: &Diagram) {
        for kind in EntityKind::ALL {
            let map = &mut self.maps[Self::slot(kind)];
            for entity_id in diagram.entity_ids(kind) {
                if map.get(entity_id).map(String::as_str) == Some(diagram.id.as_str()) {
                    map.remove(entity_id);
                }
            }
        }
    }
}

#[derive(Default)]
struct CacheState {
    diagrams: HashMap<String, Diagram>,
    owners: OwnerIndex,
    /// Bumped by every committed write.
    epoch: u64,
    /// Open read tickets.
    readers: usize,
    /// Epoch of the last committed write per diagram, kept only while
    /// reads are open.
    written: HashMap<String, u64>,
}

impl CacheState {
    fn committed(&mut self, diagram_id: &str) {
        self.epoch += 1;
        if self.readers > 0 {
            self.written.insert(diagram_id.to_string(), self.epoch);
        }
    }
}

/// Cached diagram copies keyed by id, kept in step with the owner index.
#[derive(Default)]
pub struct DiagramCache {
    state: Mutex<CacheState>,
}

impl DiagramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the cached diagram. Mutating it never touches the cache.
    pub fn get(&self, diagram_id: &str) -> Option<Diagram> {
        self.state.lock().diagrams.get(diagram_id).cloned()
    }

    pub fn contains(&self, diagram_id: &str) -> bool {
        self.state.lock().diagrams.contains_key(diagram_id)
    }

    /// Cache a committed diagram, replacing and re-indexing any previous
    /// copy.
    pub fn insert(&self, diagram: Diagram) {
        let mut state = self.state.lock();
        state.committed(&diagram.id);
        store(&mut state, diagram);
    }

    /// Evict a diagram and its index entries.
    pub fn remove(&self, diagram_id: &str) -> Option<Diagram> {
        let mut state = self.state.lock();
        state.committed(diagram_id);
        let CacheState { diagrams, owners, .. } = &mut *state;
        let old = diagrams.remove(diagram_id)?;
        owners.unindex(&old);
        debug!(diagram_id, "diagram evicted");
        Some(old)
    }

    /// Start a read that runs outside the queue. Hold the ticket across
    /// the source call and hand the result to `ReadTicket::offer`.
    pub fn begin_read(&self) -> ReadTicket<'_> {
        let mut state = self.state.lock();
        state.readers += 1;
        ReadTicket {
            cache: self,
            epoch: state.epoch,
        }
    }

    /// Index lookup only.
    pub fn owner_of(&self, kind: EntityKind, entity_id: &str) -> Option<String> {
        self.state
            .lock()
            .owners
            .get(kind, entity_id)
            .map(str::to_string)
    }

    /// Scan cached diagrams for the entity; a hit is written back into the
    /// index.
    pub fn scan(&self, kind: EntityKind, entity_id: &str) -> Option<String> {
        let mut state = self.state.lock();
        let CacheState { diagrams, owners, .. } = &mut *state;
        let owner = diagrams
            .values()
            .find(|diagram| diagram.contains_entity(kind, entity_id))
            .map(|diagram| diagram.id.clone())?;
        owners.insert(kind, entity_id, &owner);
        debug!(entity_id, owner = %owner, kind = kind.as_str(), "owner index backfilled");
        Some(owner)
    }

    pub fn ids(&self) -> Vec<String> {
        self.state.lock().diagrams.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().diagrams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of indexed entities of one kind.
    pub fn indexed(&self, kind: EntityKind) -> usize {
        self.state.lock().owners.count(kind)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.diagrams.clear();
        state.owners = OwnerIndex::default();
    }
}

fn store(state: &mut CacheState, diagram: Diagram) {
    let CacheState { diagrams, owners, .. } = state;
    if let Some(old) = diagrams.remove(&diagram.id) {
        owners.unindex(&old);
    }
    owners.index(&diagram);
    debug!(diagram_id = %diagram.id, "diagram cached");
    diagrams.insert(diagram.id.clone(), diagram);
}

/// An unserialized read in flight. See the module docs.
pub struct ReadTicket<'a> {
    cache: &'a DiagramCache,
    epoch: u64,
}

impl ReadTicket<'_> {
    /// Cache what the read returned, unless a committed write for the same
    /// diagram landed after the read began. Returns whether it was cached.
    pub fn offer(&self, diagram: Diagram) -> bool {
        let mut state = self.cache.state.lock();
        let stale = state
            .written
            .get(&diagram.id)
            .is_some_and(|&epoch| epoch > self.epoch);
        if stale {
            debug!(diagram_id = %diagram.id, "stale read not cached");
            return false;
        }
        store(&mut state, diagram);
        true
    }
}

impl Drop for ReadTicket<'_> {
    fn drop(&mut self) {
        let mut state = self.cache.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            state.written.clear();
        }
    }
}
