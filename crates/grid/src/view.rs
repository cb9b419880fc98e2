use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use foundation::{GeoBounds, Observation};
use tracing::debug;

use crate::{Resolution, SpatialTileIndex, Tile, bucket};

/// Tiles for one viewport at one zoom, with the resolution they were cut at.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSet {
    pub resolution: Resolution,
    pub tiles: Vec<Tile>,
}

impl TileSet {
    pub fn total_count(&self) -> usize {
        self.tiles.iter().map(|t| t.count).sum()
    }
}

/// Pan/zoom-driven tile producer.
///
/// Owns the spatial index for the current point set and rebuilds it only
/// when the set actually changes. Each `tiles` call re-buckets from scratch.
#[derive(Debug, Default)]
pub struct TileView {
    index: SpatialTileIndex,
    fingerprint: Option<u64>,
    rebuilds: u64,
}

impl TileView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a new point set. Returns `true` if the index was rebuilt.
    pub fn update(&mut self, points: &[Observation]) -> bool {
        let fp = fingerprint(points);
        if self.fingerprint == Some(fp) {
            return false;
        }
        self.index = SpatialTileIndex::build(points.to_vec());
        self.fingerprint = Some(fp);
        self.rebuilds += 1;
        debug!(points = points.len(), cells = self.index.cell_count(), "tile index rebuilt");
        true
    }

    pub fn index(&self) -> &SpatialTileIndex {
        &self.index
    }

    /// Number of index rebuilds since construction.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Tiles intersecting `viewport` at the resolution `zoom` selects.
    ///
    /// Points are gathered from the viewport grown by one tile edge so that
    /// tiles straddling the viewport border carry their full count.
    pub fn tiles(&self, zoom: f64, viewport: &GeoBounds) -> TileSet {
        let resolution = Resolution::for_zoom(zoom);
        let res = resolution.degrees();
        let visible = viewport.normalized();
        let grown = GeoBounds::new(
            viewport.south - res,
            viewport.west - res,
            viewport.north + res,
            viewport.east + res,
        );
        let candidates = self.index.query_viewport(&grown);
        let tiles: Vec<Tile> = bucket(candidates, res)
            .into_iter()
            .filter(|t| t.bounds.intersects(&visible))
            .collect();
        TileSet { resolution, tiles }
    }
}

fn fingerprint(points: &[Observation]) -> u64 {
    let mut h = DefaultHasher::new();
    points.len().hash(&mut h);
    for p in points {
        p.source.hash(&mut h);
        p.id.as_str().hash(&mut h);
        p.latitude.map(f64::to_bits).hash(&mut h);
        p.longitude.map(f64::to_bits).hash(&mut h);
    }
    h.finish()
}
