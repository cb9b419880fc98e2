use std::collections::BTreeMap;
use std::fmt;

use foundation::math::{LatLng, MAX_LAT, MAX_LNG, MIN_LAT, MIN_LNG};
use foundation::{DedupKey, GeoBounds, Observation, SourceId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Grid cell address: `floor(lat / res)`, `floor(lng / res)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub row: i64,
    pub col: i64,
}

impl BucketKey {
    /// `pos` must already be validated and longitude-normalized.
    ///
    /// Latitude 90 is folded into the northernmost row so the pole does not
    /// open a tile that lies entirely outside the valid range.
    pub fn for_position(pos: LatLng, resolution_deg: f64) -> Self {
        let mut max_row = (MAX_LAT / resolution_deg).ceil() as i64 - 1;
        if max_row as f64 * resolution_deg >= MAX_LAT {
            max_row -= 1;
        }
        let row = ((pos.lat / resolution_deg).floor() as i64).min(max_row);
        let col = (pos.lng / resolution_deg).floor() as i64;
        Self { row, col }
    }

    /// Cell bounds, clipped to the world edges for resolutions that do not
    /// divide 90°/180° evenly.
    pub fn bounds(&self, resolution_deg: f64) -> GeoBounds {
        let south = self.row as f64 * resolution_deg;
        let west = self.col as f64 * resolution_deg;
        GeoBounds::new(
            south.max(MIN_LAT),
            west.max(MIN_LNG),
            (south + resolution_deg).min(MAX_LAT),
            (west + resolution_deg).min(MAX_LNG),
        )
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.row, self.col)
    }
}

/// Aggregate of the observations that fall into one grid cell.
///
/// Tiles are rebuilt whenever resolution, viewport or point set changes; they
/// are never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tile {
    pub bucket_key: String,
    pub bounds: GeoBounds,
    pub center: LatLng,
    pub count: usize,
    pub member_ids: Vec<DedupKey>,
    /// Most authoritative contributing source. Display hint only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceId>,
}

#[derive(Debug, Default)]
struct Acc {
    members: Vec<DedupKey>,
    source: Option<SourceId>,
}

/// Groups observations into square tiles of `resolution_deg` degrees.
///
/// Ordering contract:
/// - Tiles come out sorted by `(row, col)`, south-west first.
/// - `member_ids` keep input order.
///
/// Observations without a valid position are skipped and counted nowhere. A
/// non-finite or non-positive resolution produces no tiles.
pub fn bucket<'a, I>(points: I, resolution_deg: f64) -> Vec<Tile>
where
    I: IntoIterator<Item = &'a Observation>,
{
    if !resolution_deg.is_finite() || resolution_deg <= 0.0 {
        warn!(resolution_deg, "refusing to bucket with malformed resolution");
        return Vec::new();
    }

    let mut cells: BTreeMap<BucketKey, Acc> = BTreeMap::new();
    let mut skipped = 0usize;
    for obs in points {
        let Some(pos) = obs.position() else {
            skipped += 1;
            continue;
        };
        let acc = cells
            .entry(BucketKey::for_position(pos, resolution_deg))
            .or_default();
        acc.members.push(obs.dedup_key());
        acc.source = Some(match acc.source {
            Some(current) if current.display_rank() <= obs.source.display_rank() => current,
            _ => obs.source,
        });
    }
    if skipped > 0 {
        debug!(skipped, "observations without a valid position left out of tiles");
    }

    cells
        .into_iter()
        .filter_map(|(key, acc)| {
            let bounds = key.bounds(resolution_deg);
            if !bounds.is_valid() {
                warn!(bucket = %key, resolution_deg, "dropping tile with out-of-range bounds");
                return None;
            }
            Some(Tile {
                bucket_key: key.to_string(),
                bounds,
                center: bounds.center(),
                count: acc.members.len(),
                member_ids: acc.members,
                source: acc.source,
            })
        })
        .collect()
}
