use std::sync::Arc;

use foundation::{GeoBounds, Observation};
use grid::{Resolution, TileSet, TileView};
use parking_lot::Mutex;
use region::{
    HttpRegionBackend, PolygonQueryAdapter, RegionBackend, RegionError, RegionResult, Shape,
    ShapeMask, SourceFilter,
};
use runtime::{Coalescer, MetricsSnapshot};
use sources::{
    FetchCoordinator, FetchError, Filters, HttpSourceFetcher, MergedCollection, MergedPage,
    SourceCursor, SourceFetcher,
};
use streaming::{
    DetailEvent, DetailFetcher, DetailLoader, DetailRequest, FileCache, HttpDetailFetcher,
    MemoryCache, TtlCache,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ExplorerConfig;

/// The collaborators an [`Explorer`] talks to.
pub struct Upstreams {
    pub sources: Arc<dyn SourceFetcher>,
    pub details: Arc<dyn DetailFetcher>,
    pub region: Arc<dyn RegionBackend>,
    pub cache: Arc<dyn TtlCache>,
}

impl Upstreams {
    /// HTTP upstreams as configured; the detail cache is file-backed when a
    /// cache path is set.
    pub fn http(config: &ExplorerConfig) -> Self {
        let cache: Arc<dyn TtlCache> = match &config.cache_path {
            Some(path) => Arc::new(FileCache::new(path.clone())),
            None => Arc::new(MemoryCache::default()),
        };
        Self {
            sources: Arc::new(HttpSourceFetcher::with_timeout(
                config.active_endpoints(),
                config.request_timeout(),
            )),
            details: Arc::new(HttpDetailFetcher::new(config.geocoder_url.clone())),
            region: Arc::new(HttpRegionBackend::new(
                config.grids_url.clone(),
                config.stats_url.clone(),
            )),
            cache,
        }
    }
}

struct ViewState {
    view: TileView,
    /// Resolution of the last computed tile set; region grids use it.
    resolution: Resolution,
}

/// The applied region as the tile and page paths see it.
struct ActiveRegion {
    mask: ShapeMask,
    boundary: String,
}

/// Pipeline counters of every component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorerMetrics {
    pub sources: MetricsSnapshot,
    pub details: MetricsSnapshot,
    pub region: MetricsSnapshot,
}

/// Facade a map viewer drives.
///
/// Tiles are cheap and recomputed per view; per-item detail is fetched only
/// for what is visible, through the shared detail loader. Nothing is fetched
/// for details until [`spawn_workers`](Self::spawn_workers) has been called.
pub struct Explorer {
    view: Mutex<ViewState>,
    active: Mutex<Option<ActiveRegion>>,
    coordinator: FetchCoordinator,
    loader: DetailLoader,
    region: PolygonQueryAdapter,
    viewport: Coalescer,
}

impl Explorer {
    pub fn new(upstreams: Upstreams, config: &ExplorerConfig) -> Self {
        Self {
            view: Mutex::new(ViewState {
                view: TileView::new(),
                resolution: Resolution::for_zoom(grid::MIN_ZOOM),
            }),
            active: Mutex::new(None),
            coordinator: FetchCoordinator::new(upstreams.sources, config.coordinator.clone()),
            loader: DetailLoader::new(upstreams.cache, upstreams.details, config.loader.clone()),
            region: PolygonQueryAdapter::new(upstreams.region),
            viewport: Coalescer::new(config.coalesce_quiet()),
        }
    }

    pub fn from_config(config: &ExplorerConfig) -> Self {
        info!(
            sources = ?config.coordinator.sources,
            cache = ?config.cache_path,
            "explorer configured"
        );
        Self::new(Upstreams::http(config), config)
    }

    /// Starts the detail worker; it stops when `shutdown` is cancelled.
    pub fn spawn_workers(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.loader.spawn_worker(shutdown)
    }

    pub fn loader(&self) -> &DetailLoader {
        &self.loader
    }

    pub fn metrics(&self) -> ExplorerMetrics {
        ExplorerMetrics {
            sources: self.coordinator.metrics(),
            details: self.loader.metrics(),
            region: self.region.metrics(),
        }
    }

    /// Tiles of `points` intersecting `viewport` at the resolution for `zoom`.
    ///
    /// While a polygon is applied only points inside it are counted. The
    /// spatial index is rebuilt only when the counted points change.
    pub fn compute_tiles(&self, points: &[Observation], zoom: f64, viewport: &GeoBounds) -> TileSet {
        let clipped: Option<Vec<Observation>> = self.active.lock().as_ref().map(|region| {
            points
                .iter()
                .filter(|o| o.position().is_some_and(|p| region.mask.contains(p)))
                .cloned()
                .collect()
        });
        let points = clipped.as_deref().unwrap_or(points);

        let mut state = self.view.lock();
        state.view.update(points);
        let set = state.view.tiles(zoom, viewport);
        state.resolution = set.resolution;
        debug!(zoom, resolution = ?set.resolution, tiles = set.tiles.len(), "tiles computed");
        set
    }

    /// Resolution of the most recent [`compute_tiles`](Self::compute_tiles).
    pub fn current_resolution(&self) -> Resolution {
        self.view.lock().resolution
    }

    /// Coalesced form of [`compute_tiles`](Self::compute_tiles) for bursts
    /// of pan/zoom events.
    ///
    /// Waits out the quiet period and returns `None` if a newer call arrived
    /// meanwhile.
    pub async fn viewport_changed(
        &self,
        points: &[Observation],
        zoom: f64,
        viewport: &GeoBounds,
    ) -> Option<TileSet> {
        let Some(token) = self.viewport.submit().await else {
            debug!("viewport change superseded");
            return None;
        };
        debug!(token = token.0, "viewport settled");
        Some(self.compute_tiles(points, zoom, viewport))
    }

    /// Cursors for a query that has not fetched anything yet.
    pub fn initial_cursors(&self) -> Vec<SourceCursor> {
        self.coordinator.initial_cursors()
    }

    /// Fetches the next round from every source that still has pages and
    /// merges it into `collection`.
    ///
    /// An applied polygon is sent as the boundary filter unless `filters`
    /// already carries one.
    pub async fn fetch_merged_page(
        &self,
        collection: &mut MergedCollection,
        filters: &Filters,
        cursors: &[SourceCursor],
    ) -> Result<MergedPage, FetchError> {
        let filters = self.effective_filters(filters);
        self.coordinator
            .fetch_merged_page(collection, cursors, &filters)
            .await
    }

    /// Empty collection ordered like the merged pages.
    pub fn new_collection(&self) -> MergedCollection {
        self.coordinator.new_collection()
    }

    /// `filters` with the applied polygon filled in.
    pub fn effective_filters(&self, filters: &Filters) -> Filters {
        let mut filters = filters.clone();
        if filters.polygon.is_none() {
            if let Some(region) = self.active.lock().as_ref() {
                filters.polygon = Some(region.boundary.clone());
            }
        }
        filters
    }

    /// Abandons whatever pagination round is in flight.
    pub fn cancel_pagination(&self) {
        self.coordinator.cancel_inflight();
    }

    /// One event per request, cache hits first.
    pub async fn enrich_visible(&self, requests: Vec<DetailRequest>) -> mpsc::UnboundedReceiver<DetailEvent> {
        self.loader.enrich_visible(requests).await
    }

    /// Like [`enrich_visible`](Self::enrich_visible) but bypasses cached
    /// entries.
    pub async fn refresh_details(&self, requests: Vec<DetailRequest>) -> mpsc::UnboundedReceiver<DetailEvent> {
        self.loader.refresh(requests).await
    }

    /// Restricts tiles and stats to `shape`, gridded at the current
    /// resolution. Later tiles and pages are restricted too until
    /// [`clear_polygon`](Self::clear_polygon).
    pub async fn apply_polygon(
        &self,
        shape: Shape,
        filter: SourceFilter,
    ) -> Result<RegionResult, RegionError> {
        let mask = shape.mask()?;
        let resolution = self.current_resolution();
        let result = self.region.apply(shape, filter, resolution).await?;
        *self.active.lock() = Some(ActiveRegion {
            mask,
            boundary: result.boundary.clone(),
        });
        Ok(result)
    }

    pub async fn clear_polygon(&self) {
        self.region.clear().await;
        *self.active.lock() = None;
    }

    pub async fn active_polygon(&self) -> Option<Shape> {
        self.region.active_shape().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use foundation::{GeoBounds, Observation, SourceId};
    use grid::Resolution;
    use region::{LocalRegionBackend, Shape, SourceFilter};
    use runtime::{BoxFuture, ManualClock};
    use serde_json::{Value, json};
    use sources::{Filters, MemoryFetcher, MergedCollection, SourcePage};
    use streaming::{DetailFailure, DetailFetcher, DetailRequest, DetailTarget, MemoryCache};
    use tokio_util::sync::CancellationToken;

    use super::{Explorer, Upstreams};
    use crate::ExplorerConfig;

    struct EchoDetails;

    impl DetailFetcher for EchoDetails {
        fn request_url(&self, target: &DetailTarget) -> Result<String, DetailFailure> {
            match target {
                DetailTarget::Place { lat, lng } => Ok(format!("https://geo.test/reverse?lat={lat}&lon={lng}")),
                DetailTarget::Resource { url } => Ok(url.clone()),
            }
        }

        fn fetch(&self, url: String, _target: DetailTarget) -> BoxFuture<'_, Result<Value, DetailFailure>> {
            Box::pin(async move { Ok(json!({ "displayName": url })) })
        }
    }

    fn points() -> Vec<Observation> {
        vec![
            Observation::new(SourceId::Platform, "1", 0.5, 0.5),
            Observation::new(SourceId::Gbif, "2", 0.52, 0.51),
            Observation::new(SourceId::INaturalist, "3", 5.0, 5.0),
        ]
    }

    fn explorer(sources: Arc<MemoryFetcher>) -> Explorer {
        let upstreams = Upstreams {
            sources,
            details: Arc::new(EchoDetails),
            region: Arc::new(LocalRegionBackend::new(points())),
            cache: Arc::new(MemoryCache::new(Arc::new(ManualClock::new(0)))),
        };
        Explorer::new(upstreams, &ExplorerConfig::default())
    }

    fn world() -> GeoBounds {
        GeoBounds::new(-10.0, -10.0, 10.0, 10.0)
    }

    #[test]
    fn tiles_follow_zoom_and_remember_resolution() {
        let ex = explorer(Arc::new(MemoryFetcher::new()));
        let far = ex.compute_tiles(&points(), 3.0, &world());
        assert_eq!(far.total_count(), 3);
        assert_eq!(ex.current_resolution(), far.resolution);

        let near = ex.compute_tiles(&points(), 14.0, &world());
        assert_eq!(near.resolution, Resolution::Tiny);
        assert_eq!(near.tiles.len(), 3);
        assert_eq!(ex.current_resolution(), Resolution::Tiny);
    }

    #[tokio::test]
    async fn polygon_grids_use_last_resolution() {
        let ex = explorer(Arc::new(MemoryFetcher::new()));
        ex.compute_tiles(&points(), 14.0, &world());

        let square = Shape::polygon(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
        let result = ex.apply_polygon(square.clone(), SourceFilter::All).await.unwrap();
        assert_eq!(result.stats.total, 2);
        // Two points 0.02° apart fall into separate tiles at this resolution.
        assert_eq!(result.tiles.len(), 2);
        assert_eq!(ex.active_polygon().await, Some(square));

        ex.clear_polygon().await;
        assert_eq!(ex.active_polygon().await, None);
    }

    #[tokio::test]
    async fn applied_polygon_clips_tiles_until_cleared() {
        let ex = explorer(Arc::new(MemoryFetcher::new()));
        assert_eq!(ex.compute_tiles(&points(), 3.0, &world()).total_count(), 3);

        let square = Shape::polygon(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
        ex.apply_polygon(square, SourceFilter::All).await.unwrap();
        assert_eq!(ex.compute_tiles(&points(), 3.0, &world()).total_count(), 2);

        let bad = Shape::polygon(vec![[0.0, 0.0], [1.0, 1.0]]);
        assert!(ex.apply_polygon(bad, SourceFilter::All).await.is_err());
        assert_eq!(ex.compute_tiles(&points(), 3.0, &world()).total_count(), 2);

        ex.clear_polygon().await;
        assert_eq!(ex.compute_tiles(&points(), 3.0, &world()).total_count(), 3);
    }

    #[tokio::test]
    async fn applied_polygon_becomes_the_page_boundary_filter() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let ex = explorer(fetcher.clone());
        let square = Shape::polygon(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]]);
        ex.apply_polygon(square, SourceFilter::All).await.unwrap();

        let mut collection = ex.new_collection();
        let cursors = ex.initial_cursors();
        ex.fetch_merged_page(&mut collection, &Filters::default(), &cursors)
            .await
            .unwrap();
        let requests = fetcher.requests();
        assert!(!requests.is_empty());
        assert!(
            requests
                .iter()
                .all(|r| r.filters.polygon.as_deref() == Some("0,0|0,1|1,1|1,0|0,0"))
        );

        ex.clear_polygon().await;
        assert_eq!(ex.effective_filters(&Filters::default()).polygon, None);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_viewport_changes_collapse_to_the_last() {
        let ex = explorer(Arc::new(MemoryFetcher::new()));
        let pts = points();
        let view = world();
        let first = ex.viewport_changed(&pts, 3.0, &view);
        let second = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ex.viewport_changed(&pts, 14.0, &view).await
        };
        let (a, b) = tokio::join!(first, second);
        assert!(a.is_none());
        assert_eq!(b.map(|set| set.resolution), Some(Resolution::Tiny));
    }

    #[tokio::test]
    async fn merged_pages_accumulate_without_duplicates() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let dup = Observation::new(SourceId::Platform, "1", 1.0, 1.0);
        fetcher.set_page(
            SourceId::Platform,
            1,
            SourcePage {
                items: vec![dup.clone(), Observation::new(SourceId::Platform, "2", 1.0, 1.0)],
                total: 2,
                has_more: false,
            },
        );
        let ex = explorer(fetcher);
        let mut collection = MergedCollection::new();
        let cursors = ex.initial_cursors();

        let page = ex
            .fetch_merged_page(&mut collection, &Filters::default(), &cursors)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.added, 2);

        collection.append(vec![dup]);
        assert_eq!(collection.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn visible_items_are_enriched_once_and_then_cached() {
        let ex = explorer(Arc::new(MemoryFetcher::new()));
        let shutdown = CancellationToken::new();
        let worker = ex.spawn_workers(shutdown.clone());

        let mut rx = ex
            .enrich_visible(vec![DetailRequest::place("a", 1.0, 2.0)])
            .await;
        let first = rx.recv().await.unwrap();
        assert!(first.is_ready());
        assert!(!first.from_cache);

        let mut rx = ex
            .enrich_visible(vec![DetailRequest::place("a", 1.0, 2.0)])
            .await;
        let second = rx.recv().await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.detail(), first.detail());
        assert_eq!(ex.metrics().details.counter("detail.cache_hit"), 1);

        shutdown.cancel();
        worker.await.unwrap();
    }
}
