//! The viewer-side correction rules.
//!
//! A viewer that receives a `stateUpdate` does not blindly seek: it adopts
//! `paused` and `playbackRate`, compensates the playhead for delivery
//! latency, and seeks only when its own position has drifted past the
//! tolerance. The tolerance is what absorbs broadcast self-echo, pub/sub
//! jitter, and out-of-order delivery without visible corrections.
//!
//! The functions are pure so the contract is testable on its own; the
//! browser client is a separate codebase that implements the same rules.

use crate::PlaybackState;

/// Drift below this threshold (seconds) never triggers a seek.
pub const SEEK_TOLERANCE_SECS: f64 = 0.5;

/// What the viewer knows about its own playback element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPlayback {
    pub paused: bool,
    /// Seconds from the start of the media.
    pub position: f64,
    pub rate: f64,
}

/// The adjustment a viewer applies after receiving a `stateUpdate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub paused: bool,
    pub rate: f64,
    /// `Some(target)` only when drift exceeds [`SEEK_TOLERANCE_SECS`].
    pub seek_to: Option<f64>,
}

/// Latency-compensated playhead for a received update: the media kept
/// advancing while the frame was in flight, so the target position is the
/// host's playhead plus the observed delivery delay.
pub fn latency_adjusted_target(state: &PlaybackState, servertime: i64, local_now_ms: i64) -> f64 {
    let latency_ms = local_now_ms - servertime;
    state.current_time + latency_ms as f64 / 1000.0
}

/// Reconcile local playback against a received update.
pub fn reconcile(
    local: &LocalPlayback,
    state: &PlaybackState,
    servertime: i64,
    local_now_ms: i64,
) -> Correction {
    let target = latency_adjusted_target(state, servertime, local_now_ms);
    let drift = (local.position - target).abs();
    Correction {
        paused: state.paused,
        rate: state.playback_rate,
        seek_to: (drift > SEEK_TOLERANCE_SECS).then_some(target),
    }
}
