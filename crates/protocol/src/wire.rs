use serde::{Deserialize, Serialize};

use crate::{PlaybackState, VideoManifest};

/// Frames a viewer sends to its streaming node over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Host-authored playback change. Ignored from non-hosts.
    StateUpdate { state: PlaybackState },
    /// Request for the video manifest; answered to the sender only.
    VideoMetadata,
    /// Liveness probe; answered with `heartbeatAck`.
    Heartbeat,
    /// Liveness acknowledgement; no state change.
    HeartbeatAck,
}

/// Frames a streaming node sends to a viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// A playback state, stamped with the node's wall time in milliseconds
    /// so the viewer can compensate for delivery latency.
    StateUpdate {
        state: PlaybackState,
        servertime: i64,
    },
    /// The manifest, carried under `state` to match the envelope shape.
    VideoMetadata { state: VideoManifest },
    Heartbeat,
    HeartbeatAck,
}
