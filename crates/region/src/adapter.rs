use std::sync::Arc;

use grid::{Resolution, Tile};
use runtime::{Metrics, MetricsSnapshot};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{RegionBackend, RegionError, RegionStats, Shape, SourceFilter, to_boundary_string};

/// Tiles and stats restricted to the active shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionResult {
    pub boundary: String,
    pub tiles: Vec<Tile>,
    pub stats: RegionStats,
}

#[derive(Debug, Default)]
struct Active {
    shape: Option<Shape>,
    filter: SourceFilter,
    boundary: String,
    tiles: Option<(Resolution, Vec<Tile>)>,
    /// `Some` once stats were loaded for this shape and filter.
    stats: Option<RegionStats>,
}

/// Holds the active region filter and resolves it through a backend.
///
/// Re-applying an unchanged shape and filter reuses the loaded stats; they
/// are refetched only after the shape or filter changes, or after `clear`.
/// Upstream failures degrade to empty tiles and zero stats and are retried on
/// the next `apply`.
pub struct PolygonQueryAdapter {
    backend: Arc<dyn RegionBackend>,
    active: Mutex<Active>,
    metrics: Metrics,
}

impl PolygonQueryAdapter {
    pub fn new(backend: Arc<dyn RegionBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(Active::default()),
            metrics: Metrics::new(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn active_shape(&self) -> Option<Shape> {
        self.active.lock().await.shape.clone()
    }

    /// Validates `shape`, makes it the active region and resolves it.
    ///
    /// The only error is [`RegionError::ShapeInvalid`]; an invalid shape
    /// leaves the previous region in place.
    pub async fn apply(
        &self,
        shape: Shape,
        filter: SourceFilter,
        resolution: Resolution,
    ) -> Result<RegionResult, RegionError> {
        let boundary = to_boundary_string(&shape)?;

        let mut active = self.active.lock().await;
        let unchanged = active.shape.as_ref() == Some(&shape) && active.filter == filter;
        if !unchanged {
            debug!(%filter, "region changed");
            *active = Active {
                shape: Some(shape.clone()),
                filter,
                boundary,
                ..Active::default()
            };
        }

        let tiles = match &active.tiles {
            Some((res, tiles)) if *res == resolution => tiles.clone(),
            _ => {
                self.metrics.incr("region.grid_requests");
                match self.backend.grids(&shape, filter, resolution).await {
                    Ok(tiles) => {
                        active.tiles = Some((resolution, tiles.clone()));
                        tiles
                    }
                    Err(e) => {
                        self.metrics.incr("region.upstream_failures");
                        warn!(error = %e, "region grids unavailable; showing none");
                        Vec::new()
                    }
                }
            }
        };

        let stats = match &active.stats {
            Some(stats) => stats.clone(),
            None => {
                self.metrics.incr("region.stats_requests");
                match self.backend.stats(&shape, filter).await {
                    Ok(stats) => {
                        active.stats = Some(stats.clone());
                        stats
                    }
                    Err(e) => {
                        self.metrics.incr("region.upstream_failures");
                        warn!(error = %e, "region stats unavailable; reporting zero");
                        RegionStats::default()
                    }
                }
            }
        };

        Ok(RegionResult {
            boundary: active.boundary.clone(),
            tiles,
            stats,
        })
    }

    /// Drops the active region and everything loaded for it.
    pub async fn clear(&self) {
        *self.active.lock().await = Active::default();
        debug!("region cleared");
    }
}
