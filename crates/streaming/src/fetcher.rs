use std::time::Duration;

use foundation::math::LatLng;
use runtime::BoxFuture;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{DetailFailure, DetailTarget};

/// Upstream that resolves detail targets.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait DetailFetcher: Send + Sync {
    /// URL that `fetch` will request for `target`. Its normalized form is the
    /// cache key, so it must be deterministic.
    fn request_url(&self, target: &DetailTarget) -> Result<String, DetailFailure>;

    fn fetch(&self, url: String, target: DetailTarget) -> BoxFuture<'_, Result<Value, DetailFailure>>;
}

/// Reverse geocoder plus per-item detail endpoints over HTTP.
pub struct HttpDetailFetcher {
    client: reqwest::Client,
    geocoder_url: String,
}

impl HttpDetailFetcher {
    pub fn new(geocoder_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, geocoder_url)
    }

    pub fn with_client(client: reqwest::Client, geocoder_url: impl Into<String>) -> Self {
        Self {
            client,
            geocoder_url: geocoder_url.into(),
        }
    }
}

impl DetailFetcher for HttpDetailFetcher {
    fn request_url(&self, target: &DetailTarget) -> Result<String, DetailFailure> {
        match target {
            DetailTarget::Place { lat, lng } => reverse_geocode_url(&self.geocoder_url, *lat, *lng),
            DetailTarget::Resource { url } => reqwest::Url::parse(url)
                .map(|u| u.to_string())
                .map_err(|e| DetailFailure::InvalidRequest(format!("{url}: {e}"))),
        }
    }

    fn fetch(&self, url: String, target: DetailTarget) -> BoxFuture<'_, Result<Value, DetailFailure>> {
        Box::pin(async move {
            let fail = |reason: String| match &target {
                DetailTarget::Place { lat, lng } => DetailFailure::GeocodeFailed {
                    lat: *lat,
                    lng: *lng,
                    reason,
                },
                DetailTarget::Resource { .. } => DetailFailure::EnrichmentFailed {
                    url: url.clone(),
                    reason,
                },
            };

            debug!(%url, "fetching detail");
            let resp = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| fail(format!("request failed: {e}")))?;
            if !resp.status().is_success() {
                return Err(fail(format!("HTTP {}", resp.status())));
            }
            let body = resp
                .bytes()
                .await
                .map_err(|e| fail(format!("failed to read body: {e}")))?;

            let parsed = match &target {
                DetailTarget::Place { .. } => parse_geocode_response(&body),
                DetailTarget::Resource { .. } => parse_resource_detail(&body),
            };
            parsed.map_err(fail)
        })
    }
}

/// Reverse-geocoding URL for a coordinate. Coordinates are rounded to six
/// decimals so nearby requests for the same spot share a cache entry.
pub fn reverse_geocode_url(base: &str, lat: f64, lng: f64) -> Result<String, DetailFailure> {
    let pos = LatLng::checked(lat, lng)
        .ok_or_else(|| DetailFailure::InvalidRequest(format!("coordinate out of range: {lat}, {lng}")))?;
    let url = reqwest::Url::parse_with_params(
        base,
        &[
            ("format", "json".to_string()),
            ("lat", format!("{:.6}", pos.lat)),
            ("lon", format!("{:.6}", pos.lng)),
        ],
    )
    .map_err(|e| DetailFailure::InvalidRequest(format!("{base}: {e}")))?;
    Ok(url.to_string())
}

const LOCALITY_KEYS: [&str; 5] = ["city", "town", "village", "hamlet", "suburb"];
const REGION_KEYS: [&str; 3] = ["county", "state", "country"];

/// Place name from address components: locality, county, state, country.
/// Empty and repeated components are skipped.
pub fn display_name_from_address(address: &Map<String, Value>) -> Option<String> {
    let locality = LOCALITY_KEYS
        .iter()
        .find_map(|k| address.get(*k).and_then(Value::as_str));
    let mut parts: Vec<&str> = Vec::new();
    for part in locality
        .into_iter()
        .chain(REGION_KEYS.iter().filter_map(|k| address.get(*k).and_then(Value::as_str)))
    {
        let part = part.trim();
        if !part.is_empty() && !parts.contains(&part) {
            parts.push(part);
        }
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// `{displayName, address}` from a reverse-geocoder response.
pub fn parse_geocode_response(body: &[u8]) -> Result<Value, String> {
    let v: Value = serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {e}"))?;
    if let Some(err) = v.get("error").and_then(Value::as_str) {
        return Err(err.to_string());
    }
    let address = v.get("address").and_then(Value::as_object);
    let name = address
        .and_then(display_name_from_address)
        .or_else(|| v.get("display_name").and_then(Value::as_str).map(str::to_string))
        .ok_or_else(|| "no address in response".to_string())?;
    Ok(json!({
        "displayName": name,
        "address": address.cloned().unwrap_or_default(),
    }))
}

/// `{items, media, species}` from a detail endpoint.
///
/// Accepts a bare array, `{data: [...]}`, `{items: [...]}` or a single object
/// under `data`. Missing `media`/`species` come back as empty arrays.
pub fn parse_resource_detail(body: &[u8]) -> Result<Value, String> {
    let v: Value = serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let (items, mut rest) = match v {
        Value::Array(items) => (items, Map::new()),
        Value::Object(mut obj) => {
            if obj.get("success").and_then(Value::as_bool) == Some(false) {
                return Err("upstream reported failure".to_string());
            }
            let items = match obj.remove("data").or_else(|| obj.remove("items")) {
                Some(Value::Array(items)) => items,
                Some(single @ Value::Object(_)) => vec![single],
                Some(Value::Null) | None => Vec::new(),
                Some(other) => return Err(format!("unexpected data payload: {other}")),
            };
            (items, obj)
        }
        other => return Err(format!("unexpected detail payload: {other}")),
    };
    let mut take_array = |key: &str| match rest.remove(key) {
        Some(Value::Array(a)) => a,
        _ => Vec::new(),
    };
    let media = take_array("media");
    let species = take_array("species");
    Ok(json!({ "items": items, "media": media, "species": species }))
}
