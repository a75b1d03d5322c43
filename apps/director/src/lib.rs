//! The session director: issues sessions, validates joins, and steers each
//! join to the least-loaded streaming node.

pub mod config;
pub mod handlers;
pub mod registry;

use axum::http::{header, Method, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use http_body_util::Full;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::handlers::{
    create_session, health_check, heartbeat_node, metrics_handler, register_node,
    validate_session, AppState,
};

pub fn build_router(state: AppState, metrics: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:key/validate", get(validate_session))
        .route("/api/streaming-servers/register", post(register_node))
        .route("/api/streaming-servers/heartbeat", post(heartbeat_node))
        .route("/health", get(health_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    Router::new()
        .merge(api_routes)
        .merge(metrics_routes)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
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

/// A panicking handler must not tear down the process; log it and answer 500.
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
