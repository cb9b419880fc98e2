use serde::{Deserialize, Serialize};

use crate::math::{LatLng, MAX_LAT, MAX_LNG, MIN_LAT, MIN_LNG, normalize_lng};

/// Geographic bounding box in degrees.
///
/// Convention:
/// - `west > east` means the box crosses the antimeridian.
/// - Serialized as `[[south, west], [north, east]]`, the corner-pair form map
///   widgets use for fit-bounds.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 2]; 2]", into = "[[f64; 2]; 2]")]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn new(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            south,
            west,
            north,
            east,
        }
    }

    pub fn world() -> Self {
        Self::new(MIN_LAT, MIN_LNG, MAX_LAT, MAX_LNG)
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// All four edges finite and inside the valid lat/lng ranges.
    pub fn is_valid(&self) -> bool {
        let finite = [self.south, self.west, self.north, self.east]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.south <= self.north
            && (MIN_LAT..=MAX_LAT).contains(&self.south)
            && (MIN_LAT..=MAX_LAT).contains(&self.north)
            && (MIN_LNG..=MAX_LNG).contains(&self.west)
            && (MIN_LNG..=MAX_LNG).contains(&self.east)
    }

    pub fn center(&self) -> LatLng {
        let lat = (self.south + self.north) / 2.0;
        let lng = if self.crosses_antimeridian() {
            normalize_lng((self.west + self.east + 360.0) / 2.0)
        } else {
            (self.west + self.east) / 2.0
        };
        LatLng::new(lat, lng)
    }

    pub fn contains(&self, p: LatLng) -> bool {
        if p.lat < self.south || p.lat > self.north {
            return false;
        }
        if self.crosses_antimeridian() {
            p.lng >= self.west || p.lng <= self.east
        } else {
            p.lng >= self.west && p.lng <= self.east
        }
    }

    /// Edge-inclusive overlap test; either box may cross the antimeridian.
    pub fn intersects(&self, other: &GeoBounds) -> bool {
        if self.north < other.south || self.south > other.north {
            return false;
        }
        self.lng_spans()
            .into_iter()
            .flatten()
            .any(|(w, e)| {
                other
                    .lng_spans()
                    .into_iter()
                    .flatten()
                    .any(|(ow, oe)| w <= oe && ow <= e)
            })
    }

    /// Splits the longitude extent into at most two non-wrapping spans.
    pub fn lng_spans(&self) -> [Option<(f64, f64)>; 2] {
        if self.crosses_antimeridian() {
            [Some((self.west, MAX_LNG)), Some((MIN_LNG, self.east))]
        } else {
            [Some((self.west, self.east)), None]
        }
    }

    /// Brings map-widget bounds into canonical form.
    ///
    /// Latitudes are clamped, longitudes wrapped into `[-180, 180]`; a span of
    /// 360° or more becomes the whole longitude range. A wrapped box comes out
    /// with `west > east`.
    pub fn normalized(&self) -> GeoBounds {
        let south = self.south.clamp(MIN_LAT, MAX_LAT);
        let north = self.north.clamp(MIN_LAT, MAX_LAT);
        if !self.west.is_finite() || !self.east.is_finite() || self.east - self.west >= 360.0 {
            return GeoBounds::new(south, MIN_LNG, north, MAX_LNG);
        }
        let west = normalize_lng(self.west);
        let mut east = normalize_lng(self.east);
        if east == MIN_LNG && self.east > self.west {
            east = MAX_LNG;
        }
        GeoBounds::new(south, west, north, east)
    }

    pub fn to_pairs(self) -> [[f64; 2]; 2] {
        [[self.south, self.west], [self.north, self.east]]
    }
}

impl From<[[f64; 2]; 2]> for GeoBounds {
    fn from(v: [[f64; 2]; 2]) -> Self {
        Self::new(v[0][0], v[0][1], v[1][0], v[1][1])
    }
}

impl From<GeoBounds> for [[f64; 2]; 2] {
    fn from(b: GeoBounds) -> Self {
        b.to_pairs()
    }
}

#[cfg(test)]
mod tests {
    use super::GeoBounds;
    use crate::math::LatLng;

    #[test]
    fn contains_is_edge_inclusive() {
        let b = GeoBounds::new(0.0, 0.0, 1.0, 1.0);
        assert!(b.contains(LatLng::new(0.0, 0.0)));
        assert!(b.contains(LatLng::new(1.0, 1.0)));
        assert!(!b.contains(LatLng::new(1.5, 0.5)));
    }

    #[test]
    fn antimeridian_box_contains_both_sides() {
        let b = GeoBounds::new(-10.0, 170.0, 10.0, -170.0);
        assert!(b.crosses_antimeridian());
        assert!(b.contains(LatLng::new(0.0, 175.0)));
        assert!(b.contains(LatLng::new(0.0, -175.0)));
        assert!(!b.contains(LatLng::new(0.0, 0.0)));
        assert!((b.center().lng - (-180.0)).abs() < 1e-9);
    }

    #[test]
    fn intersects_handles_wrapping_boxes() {
        let wrap = GeoBounds::new(-10.0, 170.0, 10.0, -170.0);
        assert!(wrap.intersects(&GeoBounds::new(0.0, -175.0, 1.0, -174.0)));
        assert!(wrap.intersects(&GeoBounds::new(0.0, 171.0, 1.0, 172.0)));
        assert!(!wrap.intersects(&GeoBounds::new(0.0, 0.0, 1.0, 1.0)));
        assert!(!wrap.intersects(&GeoBounds::new(20.0, 171.0, 21.0, 172.0)));
    }

    #[test]
    fn serializes_as_corner_pairs() {
        let b = GeoBounds::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "[[1.0,2.0],[3.0,4.0]]");
        let back: GeoBounds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn normalized_wraps_widget_bounds() {
        let b = GeoBounds::new(-5.0, 170.0, 5.0, 190.0).normalized();
        assert_eq!(b, GeoBounds::new(-5.0, 170.0, 5.0, -170.0));
        assert!(b.crosses_antimeridian());

        let east_edge = GeoBounds::new(-5.0, 170.0, 5.0, 180.0).normalized();
        assert_eq!(east_edge, GeoBounds::new(-5.0, 170.0, 5.0, 180.0));

        let whole = GeoBounds::new(-95.0, -400.0, 95.0, 400.0).normalized();
        assert_eq!(whole, GeoBounds::world());
    }

    #[test]
    fn validity_rejects_out_of_range_edges() {
        assert!(GeoBounds::world().is_valid());
        assert!(!GeoBounds::new(89.0, 0.0, 91.0, 1.0).is_valid());
        assert!(!GeoBounds::new(0.0, 0.0, f64::NAN, 1.0).is_valid());
    }
}
