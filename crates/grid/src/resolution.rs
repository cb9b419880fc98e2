use serde::{Deserialize, Serialize};

pub const MIN_ZOOM: f64 = 0.0;
pub const MAX_ZOOM: f64 = 20.0;

/// Tile edge length, one of nine fixed steps.
///
/// Variants are declared coarsest first, so the derived `Ord` runs from
/// largest to smallest tile.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    ExtremelyLarge,
    VeryLarge,
    Large,
    MediumLarge,
    Medium,
    MediumSmall,
    Small,
    VerySmall,
    Tiny,
}

/// `(minimum zoom, resolution)`, checked top to bottom; lower bounds inclusive.
const ZOOM_THRESHOLDS: [(f64, Resolution); 8] = [
    (14.0, Resolution::Tiny),
    (12.0, Resolution::VerySmall),
    (10.0, Resolution::Small),
    (9.0, Resolution::MediumSmall),
    (8.0, Resolution::Medium),
    (7.0, Resolution::MediumLarge),
    (6.0, Resolution::Large),
    (5.0, Resolution::VeryLarge),
];

impl Resolution {
    pub const ALL: [Resolution; 9] = [
        Resolution::ExtremelyLarge,
        Resolution::VeryLarge,
        Resolution::Large,
        Resolution::MediumLarge,
        Resolution::Medium,
        Resolution::MediumSmall,
        Resolution::Small,
        Resolution::VerySmall,
        Resolution::Tiny,
    ];

    /// Edge length in degrees.
    pub fn degrees(self) -> f64 {
        match self {
            Resolution::ExtremelyLarge => 0.5,
            Resolution::VeryLarge => 0.3,
            Resolution::Large => 0.2,
            Resolution::MediumLarge => 0.1,
            Resolution::Medium => 0.05,
            Resolution::MediumSmall => 0.035,
            Resolution::Small => 0.02,
            Resolution::VerySmall => 0.01,
            Resolution::Tiny => 0.005,
        }
    }

    /// Total over all inputs: zoom is clamped to `[0, 20]` and NaN reads as 0.
    pub fn for_zoom(zoom: f64) -> Resolution {
        let zoom = if zoom.is_nan() {
            MIN_ZOOM
        } else {
            zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        };
        ZOOM_THRESHOLDS
            .iter()
            .find(|(min_zoom, _)| zoom >= *min_zoom)
            .map(|(_, r)| *r)
            .unwrap_or(Resolution::ExtremelyLarge)
    }
}

/// Zoom as sent by a map widget; numeric strings are accepted, anything
/// else counts as zoom 0.
pub fn zoom_from_value(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(MIN_ZOOM),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(MIN_ZOOM),
        _ => MIN_ZOOM,
    }
}

#[cfg(test)]
mod tests {
    use super::{Resolution, zoom_from_value};
    use serde_json::json;

    #[test]
    fn matches_threshold_table_at_boundaries() {
        let cases = [
            (20.0, Resolution::Tiny),
            (14.0, Resolution::Tiny),
            (13.99, Resolution::VerySmall),
            (12.0, Resolution::VerySmall),
            (11.5, Resolution::Small),
            (10.0, Resolution::Small),
            (9.0, Resolution::MediumSmall),
            (8.0, Resolution::Medium),
            (7.0, Resolution::MediumLarge),
            (6.0, Resolution::Large),
            (5.0, Resolution::VeryLarge),
            (4.99, Resolution::ExtremelyLarge),
            (0.0, Resolution::ExtremelyLarge),
        ];
        for (zoom, expected) in cases {
            assert_eq!(Resolution::for_zoom(zoom), expected, "zoom {zoom}");
        }
    }

    #[test]
    fn degrees_never_grow_with_zoom() {
        let mut prev = f64::INFINITY;
        let mut z = 0.0;
        while z <= 20.0 {
            let d = Resolution::for_zoom(z).degrees();
            assert!(d <= prev, "resolution grew at zoom {z}");
            prev = d;
            z += 0.01;
        }
    }

    #[test]
    fn out_of_range_and_nan_are_clamped() {
        assert_eq!(Resolution::for_zoom(f64::NAN), Resolution::ExtremelyLarge);
        assert_eq!(Resolution::for_zoom(-3.0), Resolution::ExtremelyLarge);
        assert_eq!(Resolution::for_zoom(42.0), Resolution::Tiny);
        assert_eq!(Resolution::for_zoom(f64::INFINITY), Resolution::Tiny);
    }

    #[test]
    fn json_zoom_coerces_non_numbers_to_zero() {
        assert_eq!(zoom_from_value(&json!(12)), 12.0);
        assert_eq!(zoom_from_value(&json!(" 9.5 ")), 9.5);
        assert_eq!(zoom_from_value(&json!("far")), 0.0);
        assert_eq!(zoom_from_value(&json!(null)), 0.0);
        assert_eq!(Resolution::for_zoom(zoom_from_value(&json!("9.5"))), Resolution::MediumSmall);
    }

    #[test]
    fn all_is_coarsest_first() {
        let degrees: Vec<f64> = Resolution::ALL.iter().map(|r| r.degrees()).collect();
        assert!(degrees.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(serde_json::to_string(&Resolution::MediumSmall).unwrap(), "\"mediumSmall\"");
    }
}
