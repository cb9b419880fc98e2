use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Shared pipeline counters.
///
/// Interior mutability so every clone of a loader or coordinator can record
/// through `&self`. Snapshots use sorted maps so their ordering is stable.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    counters: BTreeMap<&'static str, u64>,
    histograms: BTreeMap<&'static str, Histogram>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Histogram {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

impl Histogram {
    pub fn record(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
    }

    pub fn mean(&self) -> Option<u64> {
        (self.count > 0).then(|| self.sum / self.count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub counters: Vec<(&'static str, u64)>,
    pub histograms: Vec<(&'static str, Histogram)>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &'static str, by: u64) {
        *self.inner.lock().counters.entry(name).or_insert(0) += by;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn record(&self, name: &'static str, value: u64) {
        self.inner
            .lock()
            .histograms
            .entry(name)
            .or_default()
            .record(value);
    }

    pub fn histogram(&self, name: &str) -> Option<Histogram> {
        self.inner.lock().histograms.get(name).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock();
        MetricsSnapshot {
            counters: inner.counters.iter().map(|(k, v)| (*k, *v)).collect(),
            histograms: inner.histograms.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Histogram, Metrics};

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.incr("cache.hit");
        m.add("cache.hit", 2);
        assert_eq!(m.counter("cache.hit"), 3);
        assert_eq!(m.counter("missing"), 0);
    }

    #[test]
    fn histogram_tracks_min_max_mean() {
        let mut h = Histogram::default();
        assert_eq!(h.mean(), None);
        h.record(5);
        h.record(2);
        h.record(8);
        assert_eq!((h.count, h.sum, h.min, h.max), (3, 15, 2, 8));
        assert_eq!(h.mean(), Some(5));
    }

    #[test]
    fn snapshot_is_stably_sorted() {
        let m = Metrics::new();
        m.incr("b");
        m.incr("a");
        m.record("h2", 10);
        m.record("h1", 5);

        let snap = m.snapshot();
        assert_eq!(snap.counters, vec![("a", 1), ("b", 1)]);
        assert_eq!(snap.counter("b"), 1);
        assert_eq!(snap.histograms[0].0, "h1");
        assert_eq!(snap.histograms[1].0, "h2");
    }
}
