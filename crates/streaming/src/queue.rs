use std::time::Duration;

use runtime::{WorkId, WorkQueue, WorkQueueFull};
use tokio::time::Instant;

use crate::DetailRequest;

/// One pending fetch. Lives in exactly one queue until it succeeds or runs
/// out of retries.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQueueItem {
    pub request: DetailRequest,
    /// URL as sent upstream.
    pub url: String,
    /// Normalized URL; also the subscriber key.
    pub cache_key: String,
    pub retry_count: u32,
}

/// Shared FIFO of detail fetches with delayed re-entry for retries.
///
/// A thin wrapper over `runtime::WorkQueue`: immediately ready items come
/// out in insertion order, a backed-off retry does not block them.
#[derive(Debug)]
pub struct FetchQueue {
    inner: WorkQueue<FetchQueueItem>,
}

impl FetchQueue {
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: WorkQueue::with_max_len(max_pending),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, cache_key: &str) -> bool {
        self.inner.iter().any(|item| item.cache_key == cache_key)
    }

    pub fn push(&mut self, item: FetchQueueItem) -> Result<WorkId, WorkQueueFull> {
        self.inner.try_push(item)
    }

    /// Re-enters `item` once `delay` has passed since `now`.
    pub fn push_after(
        &mut self,
        item: FetchQueueItem,
        now: Instant,
        delay: Duration,
    ) -> Result<WorkId, WorkQueueFull> {
        self.inner.try_push_at(now + delay, item)
    }

    pub fn next_ready_at(&self) -> Option<Instant> {
        self.inner.next_ready_at()
    }

    pub fn pop_ready(&mut self, now: Instant) -> Option<FetchQueueItem> {
        self.inner.pop_ready(now).map(|(_, item)| item)
    }
}
