use std::collections::BTreeMap;
use std::time::Duration;

use foundation::{Observation, SourceId};
use runtime::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{FetchError, PageRequest, SourceFetcher, SourcePage};

/// Paginated HTTP collections, one base URL per source.
pub struct HttpSourceFetcher {
    client: reqwest::Client,
    endpoints: BTreeMap<SourceId, String>,
}

impl HttpSourceFetcher {
    pub fn new(endpoints: BTreeMap<SourceId, String>) -> Self {
        Self::with_timeout(endpoints, Duration::from_secs(30))
    }

    pub fn with_timeout(endpoints: BTreeMap<SourceId, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, endpoints }
    }

    pub fn with_client(client: reqwest::Client, endpoints: BTreeMap<SourceId, String>) -> Self {
        Self { client, endpoints }
    }

    pub fn sources(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.endpoints.keys().copied()
    }
}

impl SourceFetcher for HttpSourceFetcher {
    fn endpoint(&self, source: SourceId) -> String {
        self.endpoints
            .get(&source)
            .cloned()
            .unwrap_or_else(|| "<unconfigured>".to_string())
    }

    fn fetch_page(&self, request: PageRequest) -> BoxFuture<'_, Result<SourcePage, FetchError>> {
        Box::pin(async move {
            let source = request.source;
            let Some(url) = self.endpoints.get(&source) else {
                return Err(FetchError::unavailable(
                    source,
                    self.endpoint(source),
                    "no endpoint configured",
                ));
            };
            let unavailable = |reason: String| FetchError::unavailable(source, url.as_str(), reason);

            debug!(%source, endpoint = %url, page = request.page, "requesting page");
            let resp = self
                .client
                .get(url)
                .query(&request.query_pairs())
                .send()
                .await
                .map_err(|e| unavailable(format!("request failed: {e}")))?;

            if !resp.status().is_success() {
                return Err(unavailable(format!("HTTP {}", resp.status())));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|e| unavailable(format!("failed to read body: {e}")))?;

            parse_page_response(source, request.page, request.per_page, &body).map_err(unavailable)
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct PaginationMeta {
    current_page: Option<u64>,
    last_page: Option<u64>,
    total: Option<u64>,
}

/// Decodes either upstream envelope into a [`SourcePage`].
///
/// - `{data: [...], meta: {current_page, last_page, total}}`
/// - `{success, data: [...]}`, which carries no totals: `has_more` is a full
///   page and the total counts every item seen so far.
///
/// Every item is stamped with `source`. Items that still fail to decode are
/// dropped; a body that is not one of the envelopes is an error.
pub fn parse_page_response(
    source: SourceId,
    page: u32,
    per_page: u32,
    body: &[u8],
) -> Result<SourcePage, String> {
    let root: Value = serde_json::from_slice(body).map_err(|e| format!("invalid JSON: {e}"))?;
    let Value::Object(mut root) = root else {
        return Err("response is not a JSON object".to_string());
    };
    if root.get("success").and_then(Value::as_bool) == Some(false) {
        let message = root
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream reported failure");
        return Err(message.to_string());
    }
    let Some(Value::Array(raw)) = root.remove("data") else {
        return Err("response has no data array".to_string());
    };

    let received = raw.len();
    let items = decode_items(source, raw);
    let full_page = received as u64 >= u64::from(per_page.max(1));

    let page_out = match root.remove("meta") {
        Some(meta) => {
            let meta: PaginationMeta = serde_json::from_value(meta).unwrap_or_default();
            let has_more = match (meta.current_page, meta.last_page) {
                (Some(current), Some(last)) => current < last,
                _ => full_page,
            };
            let total = meta
                .total
                .unwrap_or(u64::from(page.saturating_sub(1)) * u64::from(per_page) + received as u64);
            SourcePage {
                items,
                total,
                has_more,
            }
        }
        None => SourcePage {
            items,
            total: u64::from(page.saturating_sub(1)) * u64::from(per_page) + received as u64,
            has_more: full_page,
        },
    };
    Ok(page_out)
}

fn decode_items(source: SourceId, raw: Vec<Value>) -> Vec<Observation> {
    let mut dropped = 0usize;
    let items: Vec<Observation> = raw
        .into_iter()
        .filter_map(|item| {
            let Value::Object(mut obj) = item else {
                dropped += 1;
                return None;
            };
            obj.insert("source".to_string(), Value::String(source.as_str().to_string()));
            match serde_json::from_value::<Observation>(Value::Object(obj)) {
                Ok(obs) => Some(obs),
                Err(e) => {
                    debug!(%source, error = %e, "undecodable item");
                    dropped += 1;
                    None
                }
            }
        })
        .collect();
    if dropped > 0 {
        warn!(%source, dropped, "items dropped from page");
    }
    items
}

#[cfg(test)]
mod tests {
    use foundation::SourceId;
    use pretty_assertions::assert_eq;

    use super::parse_page_response;

    #[test]
    fn meta_envelope_reports_totals_and_last_page() {
        let body = br#"{
            "data": [
                {"id": 1, "lat": 10.5, "lng": 20.5, "created_at": "2024-03-01T10:00:00Z"},
                {"id": "b2", "latitude": "11.0", "longitude": 21.0}
            ],
            "meta": {"current_page": 2, "last_page": 5, "total": 97}
        }"#;
        let page = parse_page_response(SourceId::Platform, 2, 20, body).unwrap();
        assert_eq!(page.total, 97);
        assert!(page.has_more);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id.as_str(), "1");
        assert_eq!(page.items[0].source, SourceId::Platform);
        assert_eq!(page.items[1].latitude, Some(11.0));

        let last = br#"{"data": [], "meta": {"current_page": 5, "last_page": 5, "total": 97}}"#;
        assert!(!parse_page_response(SourceId::Platform, 5, 20, last).unwrap().has_more);
    }

    #[test]
    fn success_envelope_infers_from_page_size() {
        let body = br#"{"success": true, "data": [
            {"id": 7, "lat": 1.0, "lon": 2.0},
            {"id": 8, "lat": 1.0, "lon": 2.0}
        ]}"#;
        let page = parse_page_response(SourceId::Gbif, 3, 2, body).unwrap();
        assert!(page.has_more);
        assert_eq!(page.total, 6);
        assert!(page.items.iter().all(|o| o.source == SourceId::Gbif));

        let short = br#"{"success": true, "data": [{"id": 9}]}"#;
        let page = parse_page_response(SourceId::Gbif, 1, 2, short).unwrap();
        assert!(!page.has_more);
        assert_eq!(page.total, 1);
    }

    #[test]
    fn rejects_failure_and_malformed_bodies() {
        assert!(parse_page_response(SourceId::Gbif, 1, 20, br#"{"success": false}"#).is_err());
        assert!(parse_page_response(SourceId::Gbif, 1, 20, b"<html>").is_err());
        assert!(parse_page_response(SourceId::Gbif, 1, 20, br#"{"items": []}"#).is_err());
        assert!(parse_page_response(SourceId::Gbif, 1, 20, b"[]").is_err());
    }

    #[test]
    fn undecodable_items_are_dropped() {
        let body = br#"{"success": true, "data": [{"lat": 1.0}, 5, {"id": 3}]}"#;
        let page = parse_page_response(SourceId::INaturalist, 1, 20, body).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id.as_str(), "3");
    }
}
