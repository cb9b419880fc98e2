use serde::{Deserialize, Deserializer, Serialize};

use crate::ids::{DedupKey, ObservationId, SourceId};
use crate::math::LatLng;
use crate::time::{Timestamp, deserialize_lenient};

/// A single species observation as received from an upstream source.
///
/// Immutable once received. Coordinates are optional because upstream records
/// sometimes omit them; use [`Observation::position`] to get a validated,
/// longitude-normalized location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: ObservationId,
    pub source: SourceId,
    #[serde(default, alias = "lat", deserialize_with = "deserialize_coord")]
    pub latitude: Option<f64>,
    #[serde(
        default,
        alias = "lng",
        alias = "lon",
        deserialize_with = "deserialize_coord"
    )]
    pub longitude: Option<f64>,
    /// When the organism was observed.
    #[serde(
        default,
        alias = "created_at",
        alias = "observed_on",
        alias = "eventDate",
        deserialize_with = "deserialize_lenient"
    )]
    pub created_at: Option<Timestamp>,
    /// When the record reached the source; secondary sort key.
    #[serde(
        default,
        alias = "uploaded_at",
        alias = "updated_at",
        deserialize_with = "deserialize_lenient"
    )]
    pub uploaded_at: Option<Timestamp>,
    #[serde(default, alias = "quality_grade")]
    pub grade: Option<String>,
    #[serde(default, alias = "species", alias = "scientific_name")]
    pub taxon: Option<String>,
    /// Remaining upstream fields, passed through untouched.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Observation {
    pub fn new(source: SourceId, id: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            id: ObservationId::new(id),
            source,
            latitude: Some(lat),
            longitude: Some(lng),
            created_at: None,
            uploaded_at: None,
            grade: None,
            taxon: None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_created_at(mut self, t: Timestamp) -> Self {
        self.created_at = Some(t);
        self
    }

    pub fn with_uploaded_at(mut self, t: Timestamp) -> Self {
        self.uploaded_at = Some(t);
        self
    }

    pub fn with_taxon(mut self, taxon: impl Into<String>) -> Self {
        self.taxon = Some(taxon.into());
        self
    }

    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(self.source, self.id.clone())
    }

    /// Validated position, or `None` when a coordinate is missing, non-finite
    /// or the latitude is out of range.
    pub fn position(&self) -> Option<LatLng> {
        LatLng::checked(self.latitude?, self.longitude?)
    }
}

fn deserialize_coord<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
