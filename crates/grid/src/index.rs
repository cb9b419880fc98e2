use std::collections::HashMap;

use foundation::math::{MAX_LAT, MAX_LNG, MIN_LAT, MIN_LNG};
use foundation::{GeoBounds, Observation};

/// Edge length of an index cell in degrees. Independent of display resolution.
pub const INDEX_CELL_DEG: f64 = 1.0;

const MIN_ROW: i32 = MIN_LAT as i32;
const MAX_ROW: i32 = MAX_LAT as i32 - 1;
const MIN_COL: i32 = MIN_LNG as i32;
const MAX_COL: i32 = MAX_LNG as i32 - 1;

/// Coarse 1°×1° partition of a point set for viewport queries.
///
/// Built once per point set and reused across pan/zoom. `query_viewport`
/// costs O(cells covering the viewport + matches) instead of O(n).
///
/// Ordering contract:
/// - `query_viewport` walks cells row by row (south first), columns west to
///   east within a row, and yields members in input order inside a cell.
#[derive(Debug, Clone, Default)]
pub struct SpatialTileIndex {
    points: Vec<Observation>,
    cells: HashMap<(i32, i32), Vec<usize>>,
}

impl SpatialTileIndex {
    /// Observations without a valid position are kept out of every cell.
    pub fn build(points: Vec<Observation>) -> Self {
        let mut cells: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (idx, obs) in points.iter().enumerate() {
            let Some(pos) = obs.position() else {
                continue;
            };
            cells.entry(cell_of(pos.lat, pos.lng)).or_default().push(idx);
        }
        Self { points, cells }
    }

    pub fn points(&self) -> &[Observation] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Members of every cell touching `bounds`, partially covered cells
    /// included.
    ///
    /// The result is a superset of the exact viewport hit list; callers that
    /// need exact containment filter afterwards.
    pub fn query_viewport(&self, bounds: &GeoBounds) -> Vec<&Observation> {
        if self.cells.is_empty() {
            return Vec::new();
        }
        let b = bounds.normalized();
        if !b.south.is_finite() || !b.north.is_finite() || b.south > b.north {
            return Vec::new();
        }

        let row_lo = (b.south.floor() as i32).clamp(MIN_ROW, MAX_ROW);
        let row_hi = (b.north.floor() as i32).clamp(MIN_ROW, MAX_ROW);

        let mut out = Vec::new();
        for row in row_lo..=row_hi {
            for (west, east) in b.lng_spans().into_iter().flatten() {
                let col_lo = (west.floor() as i32).clamp(MIN_COL, MAX_COL);
                let col_hi = (east.floor() as i32).clamp(MIN_COL, MAX_COL);
                for col in col_lo..=col_hi {
                    if let Some(members) = self.cells.get(&(row, col)) {
                        out.extend(members.iter().map(|&i| &self.points[i]));
                    }
                }
            }
        }
        out
    }
}

fn cell_of(lat: f64, lng: f64) -> (i32, i32) {
    let row = ((lat / INDEX_CELL_DEG).floor() as i32).clamp(MIN_ROW, MAX_ROW);
    let col = ((lng / INDEX_CELL_DEG).floor() as i32).clamp(MIN_COL, MAX_COL);
    (row, col)
}
