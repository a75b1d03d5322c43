//! The streaming node: terminates viewer WebSockets, propagates host state
//! across the fleet through the shared keyspace, and proxies the HLS read
//! path from the object store.

pub mod config;
pub mod director_client;
pub mod hls;
pub mod hub;
pub mod media_store;
pub mod ws;

use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use http_body_util::Full;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::hub::SyncHub;
use crate::media_store::SharedMediaStore;

/// What the node advertises about itself on `/status` and to the director.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub id: String,
    pub url: String,
    pub capacity: u32,
}

#[derive(Clone)]
pub struct NodeState {
    pub hub: SyncHub,
    pub media: SharedMediaStore,
    pub identity: NodeIdentity,
}

pub fn build_router(state: NodeState, metrics: PrometheusHandle) -> Router {
    let app_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/status", get(status_handler))
        .route("/hls/:session_id/master.m3u8", get(hls::master_playlist))
        .route(
            "/hls/:session_id/:quality/playlist.m3u8",
            get(hls::quality_playlist),
        )
        .route(
            "/hls/:session_id/:quality/:segment",
            get(hls::quality_segment),
        )
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    Router::new()
        .merge(app_routes)
        .merge(metrics_routes)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// GET /status - node health for operators and probes.
async fn status_handler(State(state): State<NodeState>) -> Json<serde_json::Value> {
    Json(json!({
        "id": state.identity.id,
        "url": state.identity.url,
        "capacity": state.identity.capacity,
        "currentLoad": state.hub.current_load(),
        "status": "active",
        "lastPing": chrono::Utc::now().timestamp(),
    }))
}

/// GET /metrics - Prometheus scrape endpoint.
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ORIGIN,
            header::ACCEPT,
            header::RANGE,
        ])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
        ])
}

/// A panicking handler must not tear down the node; log it and answer 500.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::http::Response<Full<Bytes>> {
    let detail = if let Some(message) = err.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = err.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(%detail, "request handler panicked");

    axum::http::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::from(r#"{"error":"internal_server_error"}"#))
        .expect("static panic response")
}
