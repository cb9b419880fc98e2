//! Deterministic work queue for rate-limited fetch scheduling.
//!
//! Key properties:
//! - Total ordering on `(ready_at, id)`.
//! - Items ready at the same instant are processed in insertion order, so a
//!   queue of immediately-ready items is plain FIFO.
//! - An item pushed with a future `ready_at` (a delayed retry) does not block
//!   items that are already ready.
//! - Optional backpressure via a deterministic maximum pending length.
//!
//! This is intentionally simple (Vec-backed): the queues it serves hold at
//! most a page worth of items.

use tokio::time::Instant;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkQueueFull {
    pub max_len: usize,
}

impl std::fmt::Display for WorkQueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work queue full (max {} pending)", self.max_len)
    }
}

impl std::error::Error for WorkQueueFull {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    // Field order matters: earlier readiness first, then insertion order.
    ready_at: Instant,
    id: WorkId,
}

#[derive(Debug)]
struct Item<T> {
    key: Key,
    payload: T,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    items: Vec<Item<T>>,
    max_len: Option<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: Vec::new(),
            max_len: None,
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Enqueues an item that is ready immediately.
    pub fn push(&mut self, payload: T) -> WorkId {
        self.push_at(Instant::now(), payload)
    }

    /// Enqueues an item that becomes eligible at `ready_at`.
    pub fn push_at(&mut self, ready_at: Instant, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.push(Item {
            key: Key { ready_at, id },
            payload,
        });
        id
    }

    pub fn try_push(&mut self, payload: T) -> Result<WorkId, WorkQueueFull> {
        self.try_push_at(Instant::now(), payload)
    }

    pub fn try_push_at(&mut self, ready_at: Instant, payload: T) -> Result<WorkId, WorkQueueFull> {
        if let Some(max_len) = self.max_len {
            if self.items.len() >= max_len {
                return Err(WorkQueueFull { max_len });
            }
        }
        Ok(self.push_at(ready_at, payload))
    }

    /// Earliest instant at which some item becomes ready.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.items.iter().map(|i| i.key.ready_at).min()
    }

    /// Pops the oldest item whose `ready_at <= now`.
    pub fn pop_ready(&mut self, now: Instant) -> Option<(WorkId, T)> {
        let idx = self.best_index()?;
        if self.items[idx].key.ready_at > now {
            return None;
        }
        let item = self.items.swap_remove(idx);
        Some((item.key.id, item.payload))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|i| &i.payload)
    }

    fn best_index(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.key.cmp(&b.key))
            .map(|(idx, _)| idx)
    }
}
