use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (meters).
pub const WGS84_A: f64 = 6_378_137.0;

/// Meters spanned by one degree of latitude (and of longitude at the equator)
/// on a sphere of radius `WGS84_A`.
pub const METERS_PER_DEGREE: f64 = WGS84_A * std::f64::consts::PI / 180.0;

pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;
pub const MIN_LNG: f64 = -180.0;
pub const MAX_LNG: f64 = 180.0;

/// Geographic position in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Validates latitude and normalizes longitude into `[-180, 180)`.
    ///
    /// Returns `None` for non-finite values or a latitude outside `[-90, 90]`.
    pub fn checked(lat: f64, lng: f64) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        if !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return None;
        }
        Some(Self::new(lat, normalize_lng(lng)))
    }

    /// Moves this position by a planar offset in meters.
    ///
    /// Uses the spherical meters-per-degree approximation; the longitude delta
    /// is widened by `1 / cos(lat)`. Latitude is clamped to the valid range and
    /// longitude renormalized.
    pub fn offset_meters(self, north_m: f64, east_m: f64) -> Self {
        let (dlat, dlng) = offset_degrees(self.lat, north_m, east_m);
        Self::new(
            (self.lat + dlat).clamp(MIN_LAT, MAX_LAT),
            normalize_lng(self.lng + dlng),
        )
    }
}

/// `(dlat, dlng)` in degrees for a planar offset at latitude `lat`.
pub fn offset_degrees(lat: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let cos_lat = lat.to_radians().cos().max(1e-12);
    (north_m / METERS_PER_DEGREE, east_m / (METERS_PER_DEGREE * cos_lat))
}

/// Normalizes a longitude into `[-180, 180)`.
///
/// `180` maps to `-180` so points on the antimeridian land in a single column.
pub fn normalize_lng(lng: f64) -> f64 {
    let wrapped = (lng + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if wrapped >= MAX_LNG { wrapped - 360.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::{LatLng, METERS_PER_DEGREE, normalize_lng};

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn normalizes_longitude_into_half_open_range() {
        assert_close(normalize_lng(185.0), -175.0, 1e-9);
        assert_close(normalize_lng(-175.0), -175.0, 1e-9);
        assert_close(normalize_lng(180.0), -180.0, 1e-9);
        assert_close(normalize_lng(-180.0), -180.0, 1e-9);
        assert_close(normalize_lng(540.0), -180.0, 1e-9);
        assert_close(normalize_lng(-190.0), 170.0, 1e-9);
        assert_close(normalize_lng(12.5), 12.5, 1e-9);
    }

    #[test]
    fn checked_rejects_invalid_latitude_and_nan() {
        assert!(LatLng::checked(91.0, 0.0).is_none());
        assert!(LatLng::checked(-90.5, 0.0).is_none());
        assert!(LatLng::checked(f64::NAN, 0.0).is_none());
        assert!(LatLng::checked(0.0, f64::INFINITY).is_none());
        assert_eq!(LatLng::checked(90.0, 185.0), Some(LatLng::new(90.0, -175.0)));
    }

    #[test]
    fn offset_by_one_degree_of_meters() {
        let p = LatLng::new(0.0, 0.0).offset_meters(METERS_PER_DEGREE, METERS_PER_DEGREE);
        assert_close(p.lat, 1.0, 1e-9);
        assert_close(p.lng, 1.0, 1e-9);
    }

    #[test]
    fn longitude_offset_widens_with_latitude() {
        let p = LatLng::new(60.0, 0.0).offset_meters(0.0, METERS_PER_DEGREE);
        // cos(60°) = 0.5, so one equatorial degree of meters spans two degrees.
        assert_close(p.lng, 2.0, 1e-9);
    }
}
