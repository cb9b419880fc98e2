use std::f64::consts::TAU;

use foundation::GeoBounds;
use foundation::math::{LatLng, MAX_LAT, MAX_LNG, MIN_LAT, MIN_LNG, normalize_lng, offset_degrees};
use serde::{Deserialize, Serialize};

use crate::RegionError;

/// Vertices used to approximate a circle.
pub const CIRCLE_SEGMENTS: usize = 32;

/// User-drawn query region. Polygon rings are `[lng, lat]` pairs, the order
/// upstream boundary strings use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Shape {
    #[serde(rename_all = "camelCase")]
    Circle { center: LatLng, radius_m: f64 },
    Polygon { ring: Vec<[f64; 2]> },
}

impl Shape {
    pub fn circle(center: LatLng, radius_m: f64) -> Self {
        Shape::Circle { center, radius_m }
    }

    pub fn polygon(ring: Vec<[f64; 2]>) -> Self {
        Shape::Polygon { ring }
    }

    pub fn validate(&self) -> Result<(), RegionError> {
        match self {
            Shape::Circle { center, radius_m } => {
                check_vertex(center.lng, center.lat)?;
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(RegionError::invalid(format!("radius must be positive, got {radius_m}")));
                }
                Ok(())
            }
            Shape::Polygon { ring } => {
                for &[lng, lat] in ring {
                    check_vertex(lng, lat)?;
                }
                let mut distinct: Vec<[f64; 2]> = Vec::with_capacity(ring.len());
                for v in ring {
                    if !distinct.contains(v) {
                        distinct.push(*v);
                    }
                }
                if distinct.len() < 3 {
                    return Err(RegionError::invalid(format!(
                        "polygon needs at least 3 distinct vertices, got {}",
                        distinct.len()
                    )));
                }
                Ok(())
            }
        }
    }

    /// Closed `[lng, lat]` ring; circles are approximated.
    ///
    /// Longitudes are unwrapped: consecutive vertices never differ by more
    /// than 180°, so a ring crossing the antimeridian may leave `[-180, 180)`.
    pub fn ring(&self) -> Result<Vec<[f64; 2]>, RegionError> {
        self.validate()?;
        Ok(match self {
            Shape::Circle { center, radius_m } => circle_to_ring(*center, *radius_m, CIRCLE_SEGMENTS),
            Shape::Polygon { ring } => unwrap_ring(close_ring(ring.clone())),
        })
    }

    /// Validated ring and bounding box, ready for repeated containment tests.
    pub fn mask(&self) -> Result<ShapeMask, RegionError> {
        let ring = self.ring()?;
        let bounds = ring_bounds(&ring);
        Ok(ShapeMask { ring, bounds })
    }

    /// Bounding box; `west > east` when the shape crosses the antimeridian.
    pub fn bounds(&self) -> Result<GeoBounds, RegionError> {
        Ok(self.mask()?.bounds)
    }

    pub fn contains(&self, p: LatLng) -> Result<bool, RegionError> {
        Ok(self.mask()?.contains(p))
    }
}

/// A shape compiled for point tests.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMask {
    ring: Vec<[f64; 2]>,
    bounds: GeoBounds,
}

impl ShapeMask {
    pub fn bounds(&self) -> GeoBounds {
        self.bounds
    }

    /// `p` must have a normalized longitude, as [`Observation::position`]
    /// returns.
    ///
    /// [`Observation::position`]: foundation::Observation::position
    pub fn contains(&self, p: LatLng) -> bool {
        if !self.bounds.contains(p) {
            return false;
        }
        // The unwrapped ring may sit one turn east or west of `p`.
        [0.0, 360.0, -360.0]
            .iter()
            .any(|shift| ring_contains(&self.ring, LatLng::new(p.lat, p.lng + shift)))
    }
}

fn check_vertex(lng: f64, lat: f64) -> Result<(), RegionError> {
    if !lng.is_finite() || !lat.is_finite() {
        return Err(RegionError::invalid("non-finite coordinate"));
    }
    if !(MIN_LAT..=MAX_LAT).contains(&lat) || !(MIN_LNG..=MAX_LNG).contains(&lng) {
        return Err(RegionError::invalid(format!("coordinate out of range: {lng},{lat}")));
    }
    Ok(())
}

fn close_ring(mut ring: Vec<[f64; 2]>) -> Vec<[f64; 2]> {
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }
    ring
}

/// Regular `segments`-gon around `center`, closed.
///
/// Offsets use the spherical meters-per-degree approximation with the
/// longitude delta divided by `cos(lat)`. Longitudes stay relative to the
/// center and are not wrapped.
pub fn circle_to_ring(center: LatLng, radius_m: f64, segments: usize) -> Vec<[f64; 2]> {
    let segments = segments.max(3);
    (0..=segments)
        .map(|k| {
            let theta = TAU * (k % segments) as f64 / segments as f64;
            let (dlat, dlng) = offset_degrees(center.lat, radius_m * theta.cos(), radius_m * theta.sin());
            [center.lng + dlng, (center.lat + dlat).clamp(MIN_LAT, MAX_LAT)]
        })
        .collect()
}

/// Shifts each vertex by whole turns so it lies within 180° of its
/// predecessor.
fn unwrap_ring(mut ring: Vec<[f64; 2]>) -> Vec<[f64; 2]> {
    for i in 1..ring.len() {
        let prev = ring[i - 1][0];
        let mut lng = ring[i][0];
        while lng - prev > 180.0 {
            lng -= 360.0;
        }
        while prev - lng > 180.0 {
            lng += 360.0;
        }
        ring[i][0] = lng;
    }
    ring
}

fn ring_bounds(ring: &[[f64; 2]]) -> GeoBounds {
    let mut b = GeoBounds::new(MAX_LAT, MAX_LNG, MIN_LAT, MIN_LNG);
    for &[lng, lat] in ring {
        b.south = b.south.min(lat);
        b.north = b.north.max(lat);
        b.west = b.west.min(lng);
        b.east = b.east.max(lng);
    }
    if b.east - b.west >= 360.0 {
        b.west = MIN_LNG;
        b.east = MAX_LNG;
    } else if b.west < MIN_LNG || b.east > MAX_LNG {
        b.west = normalize_lng(b.west);
        b.east = normalize_lng(b.east);
    }
    b
}

/// Closed ring as sent upstream: circles approximated, longitudes wrapped.
pub fn to_wire_ring(shape: &Shape) -> Result<Vec<[f64; 2]>, RegionError> {
    Ok(shape
        .ring()?
        .into_iter()
        .map(|[lng, lat]| [wire_lng(lng), lat])
        .collect())
}

/// Pipe-delimited `lng,lat` pairs of the closed ring, e.g. `0,0|0,1|1,1|0,0`.
pub fn to_boundary_string(shape: &Shape) -> Result<String, RegionError> {
    Ok(to_wire_ring(shape)?
        .iter()
        .map(|[lng, lat]| format!("{lng},{lat}"))
        .collect::<Vec<_>>()
        .join("|"))
}

/// Longitude as sent upstream: wrapped into `[-180, 180]`, with 180 kept
/// as is so a ring ending on the antimeridian is not flipped.
fn wire_lng(lng: f64) -> f64 {
    if (MIN_LNG..=MAX_LNG).contains(&lng) { lng } else { normalize_lng(lng) }
}

/// Even-odd ray casting. Points exactly on an edge may land on either side.
pub fn ring_contains(ring: &[[f64; 2]], p: LatLng) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > p.lat) != (yj > p.lat) && p.lng < (xj - xi) * (p.lat - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}
