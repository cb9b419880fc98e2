use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use foundation::{Observation, SourceId, UnknownSource};
use grid::{Resolution, Tile, bucket};
use parking_lot::RwLock;
use runtime::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{RegionError, Shape, to_boundary_string, to_wire_ring};

/// Which sources a region query covers. Serialized as `"all"` or a source id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceFilter {
    #[default]
    All,
    Only(SourceId),
}

impl SourceFilter {
    pub fn matches(&self, source: SourceId) -> bool {
        match self {
            SourceFilter::All => true,
            SourceFilter::Only(s) => *s == source,
        }
    }

    /// Value of the upstream `data_source` parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            SourceFilter::All => "all",
            SourceFilter::Only(s) => s.as_str(),
        }
    }
}

impl fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl FromStr for SourceFilter {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") || s.is_empty() {
            return Ok(SourceFilter::All);
        }
        s.parse().map(SourceFilter::Only)
    }
}

impl TryFrom<String> for SourceFilter {
    type Error = UnknownSource;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SourceFilter> for String {
    fn from(f: SourceFilter) -> String {
        f.as_param().to_string()
    }
}

/// Aggregates over the observations inside a region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionStats {
    pub total: u64,
    #[serde(alias = "by_source")]
    pub by_source: BTreeMap<SourceId, u64>,
    #[serde(alias = "species_count")]
    pub species_count: u64,
}

impl RegionStats {
    pub fn from_observations<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Observation>,
    {
        let mut stats = RegionStats::default();
        let mut species = BTreeSet::new();
        for obs in points {
            stats.total += 1;
            *stats.by_source.entry(obs.source).or_insert(0) += 1;
            if let Some(taxon) = obs.taxon.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                species.insert(taxon.to_string());
            }
        }
        stats.species_count = species.len() as u64;
        stats
    }
}

/// Resolves a region into tiles and stats.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility. Shapes reaching a
/// backend are already validated.
pub trait RegionBackend: Send + Sync {
    fn grids<'a>(
        &'a self,
        shape: &'a Shape,
        filter: SourceFilter,
        resolution: Resolution,
    ) -> BoxFuture<'a, Result<Vec<Tile>, RegionError>>;

    fn stats<'a>(&'a self, shape: &'a Shape, filter: SourceFilter) -> BoxFuture<'a, Result<RegionStats, RegionError>>;
}

/// Upstream grid and stats endpoints.
///
/// Grids are requested with the boundary string in the query; stats are
/// POSTed as `{shape, data_source}`.
pub struct HttpRegionBackend {
    client: reqwest::Client,
    grids_url: String,
    stats_url: String,
}

impl HttpRegionBackend {
    pub fn new(grids_url: impl Into<String>, stats_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            grids_url: grids_url.into(),
            stats_url: stats_url.into(),
        }
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, RegionError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| RegionError::upstream(url, e))?;
        if !resp.status().is_success() {
            return Err(RegionError::upstream(url, format!("HTTP {}", resp.status())));
        }
        resp.json().await.map_err(|e| RegionError::upstream(url, e))
    }
}

impl RegionBackend for HttpRegionBackend {
    fn grids<'a>(
        &'a self,
        shape: &'a Shape,
        filter: SourceFilter,
        resolution: Resolution,
    ) -> BoxFuture<'a, Result<Vec<Tile>, RegionError>> {
        Box::pin(async move {
            let boundary = to_boundary_string(shape)?;
            let query = [
                ("boundary", boundary),
                ("data_source", filter.as_param().to_string()),
                ("resolution", resolution.degrees().to_string()),
            ];
            debug!(endpoint = %self.grids_url, %filter, "requesting region grids");
            let body = self.get_json(&self.grids_url, &query).await?;
            parse_tiles(body).map_err(|reason| RegionError::upstream(&self.grids_url, reason))
        })
    }

    fn stats<'a>(&'a self, shape: &'a Shape, filter: SourceFilter) -> BoxFuture<'a, Result<RegionStats, RegionError>> {
        Box::pin(async move {
            let url = self.stats_url.as_str();
            debug!(endpoint = %url, %filter, "requesting region stats");
            let resp = self
                .client
                .post(url)
                .json(&stats_body(shape, filter)?)
                .send()
                .await
                .map_err(|e| RegionError::upstream(url, e))?;
            if !resp.status().is_success() {
                return Err(RegionError::upstream(url, format!("HTTP {}", resp.status())));
            }
            let body: Value = resp.json().await.map_err(|e| RegionError::upstream(url, e))?;
            parse_stats(body).map_err(|reason| RegionError::upstream(url, reason))
        })
    }
}

/// Body of the stats request. Circles go out as the same polygon the grids
/// call describes by its boundary string.
pub fn stats_body(shape: &Shape, filter: SourceFilter) -> Result<Value, RegionError> {
    let ring = to_wire_ring(shape)?;
    Ok(json!({
        "shape": { "type": "polygon", "ring": ring },
        "data_source": filter.as_param(),
    }))
}

/// Tiles from a bare array or a `{data: [...]}` envelope.
pub fn parse_tiles(body: Value) -> Result<Vec<Tile>, String> {
    let list = match body {
        Value::Array(_) => body,
        Value::Object(mut obj) => obj.remove("data").ok_or("no data in grids response")?,
        other => return Err(format!("unexpected grids payload: {other}")),
    };
    serde_json::from_value(list).map_err(|e| e.to_string())
}

/// Stats from a bare object or a `{data: {...}}` envelope.
pub fn parse_stats(body: Value) -> Result<RegionStats, String> {
    let stats = match body {
        Value::Object(mut obj) if obj.get("data").is_some_and(Value::is_object) => {
            obj.remove("data").unwrap_or_default()
        }
        obj @ Value::Object(_) => obj,
        other => return Err(format!("unexpected stats payload: {other}")),
    };
    serde_json::from_value(stats).map_err(|e| e.to_string())
}

/// Resolves regions against an in-memory observation set.
#[derive(Debug, Default)]
pub struct LocalRegionBackend {
    points: RwLock<Vec<Observation>>,
}

impl LocalRegionBackend {
    pub fn new(points: Vec<Observation>) -> Self {
        Self {
            points: RwLock::new(points),
        }
    }

    pub fn set_points(&self, points: Vec<Observation>) {
        *self.points.write() = points;
    }

    fn inside(&self, shape: &Shape, filter: SourceFilter) -> Result<Vec<Observation>, RegionError> {
        let mask = shape.mask()?;
        let points = self.points.read();
        Ok(points
            .iter()
            .filter(|o| filter.matches(o.source))
            .filter(|o| o.position().is_some_and(|p| mask.contains(p)))
            .cloned()
            .collect())
    }
}

impl RegionBackend for LocalRegionBackend {
    fn grids<'a>(
        &'a self,
        shape: &'a Shape,
        filter: SourceFilter,
        resolution: Resolution,
    ) -> BoxFuture<'a, Result<Vec<Tile>, RegionError>> {
        let result = self
            .inside(shape, filter)
            .map(|inside| bucket(&inside, resolution.degrees()));
        Box::pin(async move { result })
    }

    fn stats<'a>(&'a self, shape: &'a Shape, filter: SourceFilter) -> BoxFuture<'a, Result<RegionStats, RegionError>> {
        let result = self
            .inside(shape, filter)
            .map(|inside| RegionStats::from_observations(&inside));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use foundation::math::LatLng;
    use foundation::{Observation, SourceId};
    use grid::Resolution;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::{
        HttpRegionBackend, LocalRegionBackend, RegionBackend, SourceFilter, parse_stats,
        parse_tiles, stats_body,
    };
    use crate::{CIRCLE_SEGMENTS, Shape, to_boundary_string};

    fn square() -> Shape {
        Shape::polygon(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]])
    }

    fn backend() -> LocalRegionBackend {
        LocalRegionBackend::new(vec![
            Observation::new(SourceId::Gbif, "in", 0.5, 0.5).with_taxon("Quercus robur"),
            Observation::new(SourceId::Platform, "in2", 0.25, 0.75).with_taxon("Quercus robur"),
            Observation::new(SourceId::Gbif, "out", 5.0, 5.0).with_taxon("Fagus sylvatica"),
        ])
    }

    #[tokio::test]
    async fn square_grids_include_center_tile_and_skip_far_point() {
        let tiles = backend()
            .grids(&square(), SourceFilter::All, Resolution::ExtremelyLarge)
            .await
            .unwrap();
        let keys: Vec<&str> = tiles.iter().map(|t| t.bucket_key.as_str()).collect();
        assert_eq!(keys, vec!["0_1", "1_1"]);
        assert!(tiles.iter().all(|t| t.member_ids.iter().all(|k| k.id.as_str() != "out")));
    }

    #[tokio::test]
    async fn stats_count_sources_and_distinct_species() {
        let b = backend();
        let stats = b.stats(&square(), SourceFilter::All).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.species_count, 1);
        assert_eq!(stats.by_source.get(&SourceId::Gbif), Some(&1));

        let only = b.stats(&square(), SourceFilter::Only(SourceId::Platform)).await.unwrap();
        assert_eq!(only.total, 1);
        assert_eq!(only.by_source.get(&SourceId::Gbif), None);
    }

    #[test]
    fn source_filter_round_trips_through_strings() {
        assert_eq!("all".parse::<SourceFilter>().unwrap(), SourceFilter::All);
        assert_eq!(
            "gbif".parse::<SourceFilter>().unwrap(),
            SourceFilter::Only(SourceId::Gbif)
        );
        assert!("nope".parse::<SourceFilter>().is_err());
        assert_eq!(
            serde_json::to_value(SourceFilter::Only(SourceId::INaturalist)).unwrap(),
            json!("inaturalist")
        );
    }

    #[test]
    fn upstream_payloads_accept_envelopes_and_aliases() {
        let stats = parse_stats(json!({"data": {"total": 9, "by_source": {"gbif": 4, "platform": 5}, "species_count": 3}})).unwrap();
        assert_eq!(stats.total, 9);
        assert_eq!(stats.species_count, 3);
        assert_eq!(stats.by_source.get(&SourceId::Platform), Some(&5));
        assert!(parse_stats(json!([1, 2])).is_err());

        let tiles = parse_tiles(json!({"data": [{
            "bucketKey": "0_0",
            "bounds": [[0.0, 0.0], [0.5, 0.5]],
            "center": {"lat": 0.25, "lng": 0.25},
            "count": 2,
            "memberIds": ["gbif:1", "gbif:2"]
        }]}))
        .unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].count, 2);
        assert!(parse_tiles(json!("nope")).is_err());
    }

    #[test]
    fn stats_body_describes_the_same_ring_as_the_boundary() {
        let shape = Shape::circle(LatLng::new(10.0, 20.0), 1_000.0);
        let body = stats_body(&shape, SourceFilter::Only(SourceId::Gbif)).unwrap();
        assert_eq!(body["shape"]["type"], "polygon");
        assert_eq!(body["data_source"], "gbif");

        let ring = body["shape"]["ring"].as_array().unwrap();
        assert_eq!(ring.len(), CIRCLE_SEGMENTS + 1);
        let from_body: Vec<String> = ring
            .iter()
            .map(|v| format!("{},{}", v[0].as_f64().unwrap(), v[1].as_f64().unwrap()))
            .collect();
        assert_eq!(from_body.join("|"), to_boundary_string(&shape).unwrap());
    }

    /// Accepts one request, answers `reply`, and returns the request body.
    async fn capture_one(listener: TcpListener, reply: &'static str) -> String {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before the body arrived");
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).into_owned();
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let len = text[..head_end]
                .lines()
                .find_map(|line| {
                    let line = line.to_ascii_lowercase();
                    line.strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            let start = head_end + 4;
            if buf.len() < start + len {
                continue;
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{reply}",
                reply.len()
            );
            sock.write_all(response.as_bytes()).await.unwrap();
            return String::from_utf8(buf[start..start + len].to_vec()).unwrap();
        }
    }

    #[tokio::test]
    async fn http_stats_posts_circles_as_polygons() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(capture_one(listener, r#"{"total": 3}"#));

        let backend = HttpRegionBackend::new(format!("http://{addr}/grids"), format!("http://{addr}/stats"));
        let shape = Shape::circle(LatLng::new(10.0, 20.0), 1_000.0);
        let stats = backend.stats(&shape, SourceFilter::All).await.unwrap();
        assert_eq!(stats.total, 3);

        let raw = server.await.unwrap();
        assert!(!raw.contains("\"circle\""), "{raw}");
        let body: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(body["shape"]["type"], "polygon");
        assert_eq!(body["data_source"], "all");
    }
}
