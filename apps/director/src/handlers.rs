use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use matinee_keyspace::SharedKeyspace;
use matinee_protocol::{NodeDescriptor, PlaybackState};

use crate::registry::NodeRegistry;

#[derive(Clone)]
pub struct AppState {
    pub keyspace: SharedKeyspace,
    pub registry: Arc<NodeRegistry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_key: String,
    pub host_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    #[serde(rename = "hostToken")]
    pub host_token: Option<String>,
}

/// Validate answers three different shapes: found (valid + isHost +
/// streaming_url), not found (valid:false + error), and hard failures
/// (`ApiError`). Options with `skip_serializing_if` keep the wire clean.
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(rename = "isHost", skip_serializing_if = "Option::is_none")]
    pub is_host: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

pub struct ApiError {
    status: StatusCode,
    error: &'static str,
}

impl ApiError {
    fn storage_unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "storage_unavailable",
        }
    }

    fn no_streaming_servers() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "no_streaming_servers_available",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}

/// POST /api/sessions - issue a session key and its host token.
pub async fn create_session(
    State(state): State<AppState>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let session_key = Uuid::new_v4().to_string();
    let host_token = Uuid::new_v4().to_string();
    let initial = PlaybackState::initial();

    if let Err(err) = state
        .keyspace
        .create_session(&session_key, &host_token, &initial)
        .await
    {
        error!(session = %session_key, error = %err, "failed to persist new session");
        counter!("matinee_sessions_created_total", 1, "outcome" => "storage_error");
        return Err(ApiError::storage_unavailable());
    }

    info!(session = %session_key, "session created");
    counter!("matinee_sessions_created_total", 1, "outcome" => "created");

    Ok(Json(CreateSessionResponse {
        session_key,
        host_token,
    }))
}

/// GET /api/sessions/:key/validate - check a join and route it to a node.
pub async fn validate_session(
    State(state): State<AppState>,
    Path(session_key): Path<String>,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let exists = state
        .keyspace
        .session_exists(&session_key)
        .await
        .map_err(|err| {
            error!(session = %session_key, error = %err, "existence check failed");
            ApiError::storage_unavailable()
        })?;

    if !exists {
        debug!(session = %session_key, "validate for unknown session");
        counter!("matinee_validate_requests_total", 1, "outcome" => "not_found");
        return Ok(Json(ValidateResponse {
            valid: false,
            is_host: None,
            streaming_url: None,
            error: Some("session_not_found"),
        }));
    }

    let mut is_host = false;
    if let Some(token) = query.host_token.as_deref().filter(|t| !t.is_empty()) {
        match state.keyspace.host_token(&session_key).await {
            Ok(Some(stored)) => is_host = stored == token,
            Ok(None) => warn!(session = %session_key, "session has no stored host token"),
            Err(err) => {
                warn!(session = %session_key, error = %err, "host token lookup failed")
            }
        }
    }

    let Some(streaming_url) = state.registry.select().await else {
        warn!(session = %session_key, "no streaming servers available");
        counter!("matinee_validate_requests_total", 1, "outcome" => "no_nodes");
        return Err(ApiError::no_streaming_servers());
    };

    debug!(session = %session_key, is_host, node_url = %streaming_url, "join validated");
    counter!("matinee_validate_requests_total", 1, "outcome" => "ok");

    Ok(Json(ValidateResponse {
        valid: true,
        is_host: Some(is_host),
        streaming_url: Some(streaming_url),
        error: None,
    }))
}

/// POST /api/streaming-servers/register
pub async fn register_node(
    State(state): State<AppState>,
    Json(descriptor): Json<NodeDescriptor>,
) -> StatusCode {
    state.registry.register(descriptor).await;
    StatusCode::OK
}

/// POST /api/streaming-servers/heartbeat
pub async fn heartbeat_node(
    State(state): State<AppState>,
    Json(descriptor): Json<NodeDescriptor>,
) -> StatusCode {
    state.registry.heartbeat(&descriptor).await;
    StatusCode::OK
}

/// GET /health
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /metrics - Prometheus scrape endpoint.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
