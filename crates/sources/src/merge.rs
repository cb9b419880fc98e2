use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use foundation::{DedupKey, Observation};

pub type Comparator = Arc<dyn Fn(&Observation, &Observation) -> Ordering + Send + Sync>;

/// Default global order: newest observation first, then newest upload, then
/// dedup key so the order is total. Missing timestamps sort last.
pub fn newest_first(a: &Observation, b: &Observation) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
        .then_with(|| a.dedup_key().cmp(&b.dedup_key()))
}

/// Accumulated, deduplicated result list across pages and sources.
///
/// Invariants, held after every `append`:
/// - at most one item per [`DedupKey`];
/// - items sorted by the collection's comparator.
#[derive(Clone)]
pub struct MergedCollection {
    items: Vec<Observation>,
    seen: HashSet<DedupKey>,
    cmp: Comparator,
}

impl Default for MergedCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MergedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedCollection")
            .field("len", &self.items.len())
            .finish_non_exhaustive()
    }
}

impl MergedCollection {
    pub fn new() -> Self {
        Self::with_comparator(Arc::new(newest_first))
    }

    pub fn with_comparator(cmp: Comparator) -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
            cmp,
        }
    }

    /// Adds the items of `batch` not already present and re-sorts.
    ///
    /// Returns the number of items actually added. Appending the same batch
    /// twice is a no-op the second time.
    pub fn append<I>(&mut self, batch: I) -> usize
    where
        I: IntoIterator<Item = Observation>,
    {
        let before = self.items.len();
        for obs in batch {
            if self.seen.insert(obs.dedup_key()) {
                self.items.push(obs);
            }
        }
        let added = self.items.len() - before;
        if added > 0 {
            let cmp = &self.cmp;
            self.items.sort_by(|a, b| cmp(a, b));
        }
        added
    }

    pub fn items(&self) -> &[Observation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Drops every item; the comparator is kept.
    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }

    pub fn into_items(self) -> Vec<Observation> {
        self.items
    }
}
