//! Per-key FIFO queue.
//!
//! Each submitted operation takes a `QueueSlot`. A slot waits until the
//! slot submitted before it for the same key has settled, then runs; the
//! slot signals its own successor when it is dropped, whether the work it
//! guarded succeeded, failed, or was abandoned. Keys never contend with
//! each other and waiting never blocks a thread.
//!
//! Submission order is the order in which `enqueue` is called, not the
//! order in which the returned slots are first awaited.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(Default)]
struct QueueState {
    next_ticket: u64,
    tails: HashMap<String, Tail>,
}

/// The most recently submitted slot for a key.
struct Tail {
    ticket: u64,
    settled: oneshot::Receiver<()>,
}

/// FIFO chains of operations, one chain per key.
#[derive(Clone, Default)]
pub struct KeyedQueue {
    state: Arc<Mutex<QueueState>>,
}

impl KeyedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot to the chain for `key`.
    pub fn enqueue(&self, key: &str) -> QueueSlot {
        let (done, settled) = oneshot::channel();
        let mut state = self.state.lock();
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let prev = state
            .tails
            .insert(key.to_string(), Tail { ticket, settled })
            .map(|tail| tail.settled);

        QueueSlot {
            state: self.state.clone(),
            key: key.to_string(),
            ticket,
            prev,
            done: Some(done),
        }
    }

    /// Whether any slot for `key` is waiting or running.
    pub fn is_pending(&self, key: &str) -> bool {
        self.state.lock().tails.contains_key(key)
    }

    /// Number of keys with queue state.
    pub fn pending_keys(&self) -> usize {
        self.state.lock().tails.len()
    }
}

/// A place in one key's chain. Holding a ready slot is holding the turn.
pub struct QueueSlot {
    state: Arc<Mutex<QueueState>>,
    key: String,
    ticket: u64,
    prev: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

impl QueueSlot {
    /// Wait for the predecessor to settle. Cancel-safe: an interrupted wait
    /// can be resumed, and the slot still links its successor on drop.
    pub async fn ready(&mut self) {
        if let Some(prev) = self.prev.as_mut() {
            // The sender is only ever dropped, so an error here is the signal.
            let _ = prev.await;
        }
        self.prev = None;
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for QueueSlot {
    fn drop(&mut self) {
        let done = self.done.take();
        match self.prev.take() {
            None => settle(&self.state, &self.key, self.ticket, done),
            // Abandoned before its turn: stay in the chain until our
            // predecessor settles, so nothing behind us starts early.
            Some(prev) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let state = self.state.clone();
                    let key = std::mem::take(&mut self.key);
                    let ticket = self.ticket;
                    handle.spawn(async move {
                        let _ = prev.await;
                        settle(&state, &key, ticket, done);
                    });
                }
                Err(_) => settle(&self.state, &self.key, self.ticket, done),
            },
        }
    }
}

/// Release a slot: forget the key if it is still the tail, then wake the
/// successor.
fn settle(
    state: &Mutex<QueueState>,
    key: &str,
    ticket: u64,
    done: Option<oneshot::Sender<()>>,
) {
    {
        let mut state = state.lock();
        let is_tail = state
            .tails
            .get(key)
            .map(|tail| tail.ticket == ticket)
            .unwrap_or(false);
        if is_tail {
            state.tails.remove(key);
        }
    }
    drop(done);
}
