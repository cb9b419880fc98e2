use serde::{Deserialize, Serialize};

/// What a detail request resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DetailTarget {
    /// Reverse geocoding of a coordinate into a place name.
    Place { lat: f64, lng: f64 },
    /// Per-item or per-tile detail endpoint.
    Resource { url: String },
}

/// Enrichment request for one visible item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRequest {
    pub item_id: String,
    pub target: DetailTarget,
}

impl DetailRequest {
    pub fn place(item_id: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            item_id: item_id.into(),
            target: DetailTarget::Place { lat, lng },
        }
    }

    pub fn resource(item_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            target: DetailTarget::Resource { url: url.into() },
        }
    }
}

/// Canonical form of a request URL, used as the cache key.
///
/// Scheme and host are lower-cased, query pairs sorted, the fragment
/// dropped. Two URLs that differ only in those respects share one entry.
pub fn normalize_url(raw: &str) -> Result<String, String> {
    let mut url = reqwest::Url::parse(raw.trim()).map_err(|e| format!("{raw}: {e}"))?;
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    Ok(url.to_string())
}
