use serde::{Deserialize, Serialize};

/// Shape of the media a node serves, answered to `videoMetadata` requests.
///
/// Static per deployment for now; a production variant would derive these
/// from the transcoder output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoManifest {
    /// Segment length in seconds.
    pub chunk_duration: u32,
    pub chunk_count: u32,
    /// Total duration in seconds.
    pub video_duration: f64,
    pub video_file_type: String,
}

impl Default for VideoManifest {
    fn default() -> Self {
        Self {
            chunk_duration: 5,
            chunk_count: 10,
            video_duration: 117.0,
            video_file_type: "mp4".to_string(),
        }
    }
}
