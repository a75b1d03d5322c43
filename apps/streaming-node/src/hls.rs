//! Adaptive-streaming read path: playlists and segments proxied from the
//! object store.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};

use crate::NodeState;

pub const MASTER_PLAYLIST: &str = "master.m3u8";
pub const QUALITY_PLAYLIST: &str = "playlist.m3u8";

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";

/// GET /hls/:session_id/master.m3u8
pub async fn master_playlist(
    State(state): State<NodeState>,
    Path(session_id): Path<String>,
) -> Response {
    serve_object(
        &state,
        format!("{}/{}", session_id, MASTER_PLAYLIST),
        PLAYLIST_CONTENT_TYPE,
    )
    .await
}

/// GET /hls/:session_id/:quality/playlist.m3u8
pub async fn quality_playlist(
    State(state): State<NodeState>,
    Path((session_id, quality)): Path<(String, String)>,
) -> Response {
    serve_object(
        &state,
        format!("{}/{}/{}", session_id, quality, QUALITY_PLAYLIST),
        PLAYLIST_CONTENT_TYPE,
    )
    .await
}

/// GET /hls/:session_id/:quality/:segment
pub async fn quality_segment(
    State(state): State<NodeState>,
    Path((session_id, quality, segment)): Path<(String, String, String)>,
) -> Response {
    if segment.contains("..") || segment.contains('/') {
        return (StatusCode::BAD_REQUEST, "invalid segment name").into_response();
    }
    serve_object(
        &state,
        format!("{}/{}/{}", session_id, quality, segment),
        SEGMENT_CONTENT_TYPE,
    )
    .await
}

async fn serve_object(state: &NodeState, key: String, content_type: &'static str) -> Response {
    match state.media.fetch(&key).await {
        Ok(Some(object)) => {
            ([(header::CONTENT_TYPE, content_type)], object.body).into_response()
        }
        Ok(None) => {
            debug!(%key, "media object not found");
            (StatusCode::NOT_FOUND, "not found").into_response()
        }
        Err(err) => {
            error!(%key, error = %err, "media store fetch failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
