use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use engine::Explorer;
use foundation::{GeoBounds, Observation};
use futures_util::StreamExt;
use futures_util::stream;
use grid::{Resolution, Tile, zoom_from_value};
use region::{RegionError, Shape, SourceFilter};
use runtime::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sources::{FetchError, Filters, MergedCollection, SourceCursor};
use streaming::{DetailEvent, DetailRequest};
use tokio::sync::{Mutex, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

const NDJSON: &str = "application/x-ndjson";

struct PageSession {
    filters: Option<Filters>,
    collection: MergedCollection,
}

#[derive(Clone)]
pub struct AppState {
    explorer: Arc<Explorer>,
    /// Observations merged so far for the current filters. Held for a whole
    /// round, so page requests for the same filters apply one after another.
    pages: Arc<Mutex<PageSession>>,
    /// Filters of the newest page request; read without waiting on `pages`.
    latest_filters: Arc<parking_lot::Mutex<Option<Filters>>>,
}

impl AppState {
    pub fn new(explorer: Arc<Explorer>) -> Self {
        let session = PageSession {
            filters: None,
            collection: explorer.new_collection(),
        };
        Self {
            explorer,
            pages: Arc::new(Mutex::new(session)),
            latest_filters: Arc::new(parking_lot::Mutex::new(None)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS]);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/tiles", post(post_tiles))
        .route("/observations/page", post(post_page))
        .route("/details", post(post_details))
        .route("/details/refresh", post(post_details_refresh))
        .route("/region", post(post_region).delete(delete_region))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Response {
    let metrics = state.explorer.metrics();
    let body = json!({
        "status": "ok",
        "pendingDetails": state.explorer.loader().pending(),
        "resolution": state.explorer.current_resolution(),
        "metrics": {
            "sources": counters(&metrics.sources),
            "details": counters(&metrics.details),
            "region": counters(&metrics.region),
        },
    });
    Json(body).into_response()
}

fn counters(snapshot: &MetricsSnapshot) -> Value {
    let map: Map<String, Value> = snapshot
        .counters
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    Value::Object(map)
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TilesRequest {
    #[serde(default)]
    points: Vec<Observation>,
    /// Number or numeric string.
    #[serde(default)]
    zoom: Value,
    viewport: GeoBounds,
    /// Wait out the quiet period and answer 204 if superseded.
    #[serde(default)]
    coalesce: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TilesResponse {
    resolution: Resolution,
    resolution_degrees: f64,
    total_count: usize,
    tiles: Vec<Tile>,
}

async fn post_tiles(State(state): State<AppState>, Json(req): Json<TilesRequest>) -> Response {
    let zoom = zoom_from_value(&req.zoom);
    let set = if req.coalesce {
        match state
            .explorer
            .viewport_changed(&req.points, zoom, &req.viewport)
            .await
        {
            Some(set) => set,
            None => return StatusCode::NO_CONTENT.into_response(),
        }
    } else {
        state.explorer.compute_tiles(&req.points, zoom, &req.viewport)
    };
    Json(TilesResponse {
        resolution: set.resolution,
        resolution_degrees: set.resolution.degrees(),
        total_count: set.total_count(),
        tiles: set.tiles,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageRequestBody {
    #[serde(default)]
    filters: Filters,
    /// Cursors returned by the previous page; omitted to start over.
    #[serde(default)]
    cursors: Option<Vec<SourceCursor>>,
}

async fn post_page(State(state): State<AppState>, Json(req): Json<PageRequestBody>) -> Response {
    // New filters must not queue behind a round for the old ones.
    let changed = {
        let mut latest = state.latest_filters.lock();
        let changed = latest.as_ref().is_some_and(|f| *f != req.filters);
        *latest = Some(req.filters.clone());
        changed
    };
    if changed {
        state.explorer.cancel_pagination();
    }

    let mut session = state.pages.lock().await;
    if req.cursors.is_none() || session.filters.as_ref() != Some(&req.filters) {
        session.filters = Some(req.filters.clone());
        session.collection.clear();
    }
    let cursors = req
        .cursors
        .unwrap_or_else(|| state.explorer.initial_cursors());

    match state
        .explorer
        .fetch_merged_page(&mut session.collection, &req.filters, &cursors)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(FetchError::Superseded) => {
            debug!("page request superseded");
            error_response(StatusCode::CONFLICT, FetchError::Superseded)
        }
        Err(err) => {
            warn!("page request failed: {err}");
            error_response(StatusCode::BAD_GATEWAY, err)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsRequest {
    requests: Vec<DetailRequest>,
    /// Fetch in fixed-size batches instead of through the shared queue.
    #[serde(default)]
    batched: bool,
}

async fn post_details(State(state): State<AppState>, Json(req): Json<DetailsRequest>) -> Response {
    if req.batched {
        let events = state.explorer.loader().enrich_batched(req.requests).await;
        let body: String = events.iter().map(DetailEvent::to_ndjson_line).collect();
        return ndjson(Body::from(body));
    }
    let expected = req.requests.len();
    let rx = state.explorer.enrich_visible(req.requests).await;
    ndjson(event_stream(rx, expected))
}

async fn post_details_refresh(
    State(state): State<AppState>,
    Json(req): Json<DetailsRequest>,
) -> Response {
    let expected = req.requests.len();
    let rx = state.explorer.refresh_details(req.requests).await;
    ndjson(event_stream(rx, expected))
}

/// One NDJSON line per event, ending after `expected` events or when the
/// loader drops the sender.
fn event_stream(rx: mpsc::UnboundedReceiver<DetailEvent>, expected: usize) -> Body {
    let lines = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<_, Infallible>(event.to_ndjson_line()), rx))
    })
    .take(expected);
    Body::from_stream(lines)
}

fn ndjson(body: Body) -> Response {
    let mut resp = (StatusCode::OK, body).into_response();
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(NDJSON));
    resp
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegionRequest {
    shape: Shape,
    #[serde(default, alias = "dataSource")]
    source: SourceFilter,
}

async fn post_region(State(state): State<AppState>, Json(req): Json<RegionRequest>) -> Response {
    match state.explorer.apply_polygon(req.shape, req.source).await {
        Ok(result) => Json(result).into_response(),
        Err(err @ RegionError::ShapeInvalid(_)) => {
            error_response(StatusCode::UNPROCESSABLE_ENTITY, err)
        }
        Err(err) => error_response(StatusCode::BAD_GATEWAY, err),
    }
}

async fn delete_region(State(state): State<AppState>) -> Response {
    state.explorer.clear_polygon().await;
    StatusCode::NO_CONTENT.into_response()
}
