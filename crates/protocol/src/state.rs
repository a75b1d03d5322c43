use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The unit of synchronization: one host-authored snapshot of playback.
///
/// `timestamp` is the host's wall clock in milliseconds at the moment of the
/// change. Ordering between snapshots is decided by `timestamp` alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub paused: bool,
    /// Seconds from the start of the media.
    pub current_time: f64,
    /// 1.0 is normal speed; always positive.
    pub playback_rate: f64,
    /// Milliseconds since the Unix epoch, as observed by the author.
    pub timestamp: i64,
}

impl PlaybackState {
    /// The state every session starts in: paused at the beginning.
    pub fn initial() -> Self {
        Self {
            paused: true,
            current_time: 0.0,
            playback_rate: 1.0,
            timestamp: now_ms(),
        }
    }

    /// Last-writer-wins acceptance rule: an incoming record replaces the
    /// stored one only when its timestamp is strictly greater. Equal
    /// timestamps lose, which makes replays idempotent and gives concurrent
    /// identical-clock writers a deterministic winner.
    pub fn supersedes(&self, stored: &PlaybackState) -> bool {
        self.timestamp > stored.timestamp
    }
}

/// Current wall time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
