//! Admin HTTP API over the cache hierarchy.
//!
//! - GET /health
//! - GET /v1/cache/stats
//! - GET | PUT | DELETE /v1/cache/entries/{key}
//! - POST /v1/cache/clear
//! - POST /v1/cache/warm
//! - POST /v1/cache/relationships
//! - GET /metrics

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheCoordinator, HierarchyStats};
use crate::server::metrics::CacheMetrics;

/// Application state shared across handlers.
pub struct AppState {
    pub cache: CacheCoordinator,
    pub metrics: CacheMetrics,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(cache: CacheCoordinator) -> Result<Self, prometheus::Error> {
        Ok(Self {
            cache,
            metrics: CacheMetrics::new()?,
            start_time: Instant::now(),
        })
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/cache/stats", get(cache_stats))
        .route(
            "/v1/cache/entries/{key}",
            get(get_entry).put(put_entry).delete(delete_entry),
        )
        .route("/v1/cache/clear", post(clear))
        .route("/v1/cache/warm", post(warm))
        .route("/v1/cache/relationships", post(add_relationship))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http().make_span_with(
                |request: &Request| {
                    let request_id = Uuid::new_v4();
                    tracing::info_span!(
                        "request",
                        %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                },
            )),
        )
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub tiers: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtlParams {
    pub ttl_secs: Option<u64>,
}

impl TtlParams {
    fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreResponse {
    /// True when every tier accepted the value.
    pub stored: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub removed: bool,
}

/// Bulk load. Values are UTF-8 text.
#[derive(Debug, Serialize, Deserialize)]
pub struct WarmRequest {
    pub entries: Vec<WarmEntry>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WarmEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WarmResponse {
    pub requested: usize,
    pub stored: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelationshipRequest {
    pub a: String,
    pub b: String,
}

// ─── Handlers ──────────────────────────────────────────────────────────────

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        tiers: state
            .cache
            .tiers()
            .iter()
            .map(|tier| tier.name().to_string())
            .collect(),
    })
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<HierarchyStats> {
    Json(state.cache.get_statistics())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, StatusCode> {
    state.metrics.observe(&state.cache.get_statistics());
    let body = state.metrics.render().map_err(|e| {
        warn!(error = %e, "Failed to render metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let value = state.cache.get(&key).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], value))
}

async fn put_entry(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(params): Query<TtlParams>,
    body: Bytes,
) -> Json<StoreResponse> {
    let stored = state.cache.set(&key, body, params.ttl()).await;
    Json(StoreResponse { stored })
}

async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Json<DeleteResponse> {
    let removed = state.cache.delete(&key).await;
    Json(DeleteResponse { removed })
}

async fn clear(State(state): State<Arc<AppState>>) -> StatusCode {
    state.cache.clear().await;
    StatusCode::NO_CONTENT
}

async fn warm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WarmRequest>,
) -> Json<WarmResponse> {
    let requested = req.entries.len();
    let ttl = req.ttl_secs.map(Duration::from_secs);
    let entries = req
        .entries
        .into_iter()
        .map(|entry| (entry.key, Bytes::from(entry.value)));
    let stored = state.cache.warm(entries, ttl).await;
    info!(requested, stored, "Warm request");
    Json(WarmResponse { requested, stored })
}

async fn add_relationship(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RelationshipRequest>,
) -> StatusCode {
    state.cache.add_key_relationship(&req.a, &req.b);
    StatusCode::NO_CONTENT
}
