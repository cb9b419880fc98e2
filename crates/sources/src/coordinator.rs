use std::sync::Arc;

use foundation::{Observation, SourceId};
use futures_util::future::join_all;
use parking_lot::Mutex;
use runtime::{Metrics, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    Comparator, FetchError, Filters, MergedCollection, PageRequest, SourceCursor, SourceFetcher,
    newest_first,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Sources in display order; fresh cursors are created in this order.
    /// A repeated source is dropped, its first position kept.
    pub sources: Vec<SourceId>,
    /// Non-primary sources are asked to exclude this one while more than one
    /// source is active. `None` disables exclusion.
    pub primary_source: Option<SourceId>,
    pub page_size: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sources: SourceId::ALL.to_vec(),
            primary_source: SourceId::ALL.first().copied(),
            page_size: 20,
        }
    }
}

/// Result of one pagination round across all active sources.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRound {
    /// Deduplicated and sorted within the round.
    pub items: Vec<Observation>,
    pub cursors: Vec<SourceCursor>,
    pub total_count: u64,
    pub has_more: bool,
}

/// Collection state after a round was appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedPage {
    pub items: Vec<Observation>,
    pub cursors: Vec<SourceCursor>,
    pub has_more: bool,
    pub total_count: u64,
    /// New items this round contributed after deduplication.
    pub added: usize,
}

#[derive(Debug, Default)]
struct Generation {
    filters: Option<Filters>,
    token: CancellationToken,
}

/// Drives independently paginated sources as one merged collection.
pub struct FetchCoordinator {
    fetcher: Arc<dyn SourceFetcher>,
    config: CoordinatorConfig,
    cmp: Comparator,
    generation: Mutex<Generation>,
    metrics: Metrics,
}

impl FetchCoordinator {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, mut config: CoordinatorConfig) -> Self {
        let mut seen = Vec::with_capacity(config.sources.len());
        config.sources.retain(|source| {
            if seen.contains(source) {
                warn!(%source, "source configured twice; ignoring the repeat");
                return false;
            }
            seen.push(*source);
            true
        });
        Self {
            fetcher,
            config,
            cmp: Arc::new(newest_first),
            generation: Mutex::new(Generation::default()),
            metrics: Metrics::new(),
        }
    }

    /// Orders every round and every collection from
    /// [`new_collection`](Self::new_collection) by `cmp` instead of
    /// newest first.
    pub fn with_comparator(mut self, cmp: Comparator) -> Self {
        self.cmp = cmp;
        self
    }

    /// Empty collection sorted like this coordinator's rounds.
    pub fn new_collection(&self) -> MergedCollection {
        MergedCollection::with_comparator(self.cmp.clone())
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Fresh cursors for every configured source.
    pub fn initial_cursors(&self) -> Vec<SourceCursor> {
        SourceCursor::for_sources(&self.config.sources)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Aborts whatever round is in flight without changing filters.
    pub fn cancel_inflight(&self) {
        let mut generation = self.generation.lock();
        generation.token.cancel();
        generation.token = CancellationToken::new();
    }

    /// Token for a round with `filters`; a change of filters cancels every
    /// round started under the previous ones.
    fn token_for(&self, filters: &Filters) -> CancellationToken {
        let mut generation = self.generation.lock();
        if generation.filters.as_ref() != Some(filters) {
            if generation.filters.is_some() {
                debug!("filters changed; superseding in-flight rounds");
            }
            generation.token.cancel();
            generation.token = CancellationToken::new();
            generation.filters = Some(filters.clone());
        }
        generation.token.clone()
    }

    /// Fetches the next page of every active cursor concurrently.
    ///
    /// Ordering contract:
    /// - returned cursors keep the input order;
    /// - items are deduplicated and sorted by the coordinator's comparator.
    ///
    /// A failing source is degraded to an empty, exhausted, `failed` cursor
    /// and never fails the round. The only error is [`FetchError::Superseded`].
    pub async fn fetch_page(
        &self,
        cursors: &[SourceCursor],
        filters: &Filters,
        page_size: u32,
    ) -> Result<PageRound, FetchError> {
        let token = self.token_for(filters);

        let active: Vec<&SourceCursor> = cursors.iter().filter(|c| c.is_active()).collect();
        let exclude = if active.len() > 1 {
            self.config.primary_source
        } else {
            None
        };

        let requests = active.iter().map(|cursor| {
            let request = PageRequest {
                source: cursor.source,
                page: cursor.next_page(),
                per_page: page_size,
                filters: filters.clone(),
                exclude_source: exclude.filter(|primary| *primary != cursor.source),
            };
            self.metrics.incr("sources.requests");
            async move { (request.source, self.fetcher.fetch_page(request).await) }
        });

        let results = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            results = join_all(requests) => Some(results),
        };
        let Some(results) = results.filter(|_| !token.is_cancelled()) else {
            self.metrics.incr("sources.superseded");
            debug!("fetch round superseded; discarding results");
            return Err(FetchError::Superseded);
        };

        let mut merged = self.new_collection();
        let mut next = Vec::with_capacity(cursors.len());
        for cursor in cursors {
            if !cursor.is_active() {
                next.push(cursor.clone());
                continue;
            }
            let outcome = results
                .iter()
                .find(|(source, _)| *source == cursor.source)
                .map(|(_, r)| r);
            match outcome {
                Some(Ok(page)) => {
                    merged.append(page.items.iter().cloned());
                    next.push(cursor.advanced(page));
                }
                Some(Err(err)) => {
                    self.metrics.incr("sources.failures");
                    warn!(
                        source = %cursor.source,
                        endpoint = %self.fetcher.endpoint(cursor.source),
                        error = %err,
                        "source unavailable; degrading to empty"
                    );
                    next.push(cursor.failed());
                }
                None => next.push(cursor.clone()),
            }
        }

        let total_count = next.iter().map(|c| c.total_known).sum();
        let has_more = next.iter().any(SourceCursor::is_active);
        debug!(
            queried = active.len(),
            items = merged.len(),
            total_count,
            has_more,
            "fetch round complete"
        );
        Ok(PageRound {
            items: merged.into_items(),
            cursors: next,
            total_count,
            has_more,
        })
    }

    /// One round at the configured page size, appended into `collection`.
    ///
    /// `collection` keeps its own comparator; take it from
    /// [`new_collection`](Self::new_collection) to stay consistent.
    pub async fn fetch_merged_page(
        &self,
        collection: &mut MergedCollection,
        cursors: &[SourceCursor],
        filters: &Filters,
    ) -> Result<MergedPage, FetchError> {
        let round = self
            .fetch_page(cursors, filters, self.config.page_size)
            .await?;
        let received = round.items.len();
        let added = collection.append(round.items);
        self.metrics.add("merge.duplicates", (received - added) as u64);
        Ok(MergedPage {
            items: collection.items().to_vec(),
            cursors: round.cursors,
            has_more: round.has_more,
            total_count: round.total_count,
            added,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use foundation::{Observation, SourceId};
    use pretty_assertions::assert_eq;

    use super::{CoordinatorConfig, FetchCoordinator};
    use crate::{
        Comparator, FetchError, Filters, MemoryFetcher, MergedCollection, SourceCursor, SourcePage,
    };

    fn items(source: SourceId, prefix: &str, n: usize) -> Vec<Observation> {
        (0..n)
            .map(|i| Observation::new(source, format!("{prefix}{i}"), 1.0, 1.0))
            .collect()
    }

    fn page(source: SourceId, n: usize, total: u64, has_more: bool) -> SourcePage {
        SourcePage {
            items: items(source, "x", n),
            total,
            has_more,
        }
    }

    fn coordinator(fetcher: Arc<MemoryFetcher>) -> FetchCoordinator {
        FetchCoordinator::new(fetcher, CoordinatorConfig::default())
    }

    #[tokio::test]
    async fn only_sources_with_more_pages_are_queried_again() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.set_page(SourceId::Platform, 1, page(SourceId::Platform, 30, 95, true));
        fetcher.set_page(SourceId::INaturalist, 1, page(SourceId::INaturalist, 0, 0, false));
        fetcher.set_page(SourceId::Gbif, 1, page(SourceId::Gbif, 12, 12, false));
        fetcher.set_page(SourceId::Platform, 2, page(SourceId::Platform, 30, 95, false));
        let coord = coordinator(fetcher.clone());
        let filters = Filters::default();

        let first = coord
            .fetch_page(&coord.initial_cursors(), &filters, 30)
            .await
            .unwrap();
        assert_eq!(first.items.len(), 42);
        assert_eq!(first.total_count, 95 + 12);
        assert!(first.has_more);

        let second = coord.fetch_page(&first.cursors, &filters, 30).await.unwrap();
        let requests = fetcher.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[3].source, SourceId::Platform);
        assert_eq!(requests[3].page, 2);
        assert_eq!(second.items.len(), 30);
        assert_eq!(second.total_count, 95 + 12);
        assert!(!second.has_more);
    }

    #[tokio::test]
    async fn non_primary_sources_exclude_the_primary_while_several_are_active() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.set_page(SourceId::Gbif, 1, page(SourceId::Gbif, 2, 50, true));
        let coord = coordinator(fetcher.clone());
        let cursors = coord.initial_cursors();
        let round = coord.fetch_page(&cursors, &Filters::default(), 20).await.unwrap();

        let requests = fetcher.requests();
        for r in &requests {
            let expected = (r.source != SourceId::Platform).then_some(SourceId::Platform);
            assert_eq!(r.exclude_source, expected, "{:?}", r.source);
        }

        // Only gbif is left; it is asked without exclusion.
        coord.fetch_page(&round.cursors, &Filters::default(), 20).await.unwrap();
        let last = fetcher.requests().pop().unwrap();
        assert_eq!(last.source, SourceId::Gbif);
        assert_eq!(last.exclude_source, None);
    }

    #[tokio::test]
    async fn failing_source_degrades_to_empty_exhausted_cursor() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.set_page(SourceId::Platform, 1, page(SourceId::Platform, 3, 3, false));
        fetcher.set_failing(SourceId::INaturalist, "HTTP 503");
        let coord = coordinator(fetcher);

        let round = coord
            .fetch_page(&coord.initial_cursors(), &Filters::default(), 20)
            .await
            .unwrap();
        assert_eq!(round.items.len(), 3);
        let inat = round
            .cursors
            .iter()
            .find(|c| c.source == SourceId::INaturalist)
            .unwrap();
        assert!(inat.failed);
        assert!(!inat.has_more);
        assert!(!round.has_more);
        assert_eq!(coord.metrics().counter("sources.failures"), 1);
    }

    #[tokio::test]
    async fn merged_page_is_idempotent_for_repeated_rounds() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.set_page(SourceId::Platform, 1, page(SourceId::Platform, 2, 2, false));
        let coord = coordinator(fetcher);
        let cursors = coord.initial_cursors();
        let mut collection = MergedCollection::new();

        let first = coord
            .fetch_merged_page(&mut collection, &cursors, &Filters::default())
            .await
            .unwrap();
        assert_eq!(first.added, 2);
        let again = coord
            .fetch_merged_page(&mut collection, &cursors, &Filters::default())
            .await
            .unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.items.len(), 2);
        assert_eq!(coord.metrics().counter("merge.duplicates"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn changed_filters_supersede_round_in_flight() {
        let fetcher = Arc::new(MemoryFetcher::new().with_delay(Duration::from_millis(100)));
        fetcher.set_page(SourceId::Platform, 1, page(SourceId::Platform, 1, 1, false));
        let coord = coordinator(fetcher);
        let cursors = coord.initial_cursors();
        let old = Filters {
            taxon: Some("Quercus".into()),
            ..Filters::default()
        };
        let new = Filters::default();

        let (stale, fresh) = tokio::join!(coord.fetch_page(&cursors, &old, 20), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coord.fetch_page(&cursors, &new, 20).await
        });
        assert_eq!(stale, Err(FetchError::Superseded));
        assert_eq!(fresh.unwrap().items.len(), 1);
        assert_eq!(coord.metrics().counter("sources.superseded"), 1);
    }

    #[tokio::test]
    async fn repeated_sources_get_one_cursor_and_one_request() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.set_page(SourceId::Gbif, 1, page(SourceId::Gbif, 2, 2, false));
        let config = CoordinatorConfig {
            sources: vec![SourceId::Gbif, SourceId::Platform, SourceId::Gbif],
            ..CoordinatorConfig::default()
        };
        let coord = FetchCoordinator::new(fetcher.clone(), config);
        assert_eq!(coord.config().sources, vec![SourceId::Gbif, SourceId::Platform]);

        let cursors = coord.initial_cursors();
        assert_eq!(cursors.len(), 2);
        let round = coord
            .fetch_page(&cursors, &Filters::default(), 20)
            .await
            .unwrap();
        assert_eq!(round.items.len(), 2);
        let gbif_requests = fetcher
            .requests()
            .iter()
            .filter(|r| r.source == SourceId::Gbif)
            .count();
        assert_eq!(gbif_requests, 1);
    }

    #[tokio::test]
    async fn rounds_and_collections_follow_the_configured_comparator() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.set_page(SourceId::Gbif, 1, page(SourceId::Gbif, 3, 3, false));
        let by_id_desc: Comparator = Arc::new(|a: &Observation, b: &Observation| b.id.cmp(&a.id));
        let coord = coordinator(fetcher).with_comparator(by_id_desc);

        let mut collection = coord.new_collection();
        let cursors = SourceCursor::for_sources(&[SourceId::Gbif]);
        let page = coord
            .fetch_merged_page(&mut collection, &cursors, &Filters::default())
            .await
            .unwrap();
        let ids: Vec<&str> = page.items.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["x2", "x1", "x0"]);
    }

    #[tokio::test]
    async fn empty_cursor_list_is_an_empty_exhausted_round() {
        let coord = coordinator(Arc::new(MemoryFetcher::new()));
        let round = coord.fetch_page(&[], &Filters::default(), 20).await.unwrap();
        assert!(round.items.is_empty());
        assert!(!round.has_more);
        assert_eq!(round.total_count, 0);
    }
}
