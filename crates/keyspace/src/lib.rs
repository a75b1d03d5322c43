//! The shared keyspace: session facts plus the per-session pub/sub topic
//! used for cross-node fan-out.
//!
//! Both backends speak the same layout (see [`keys`]): an existence
//! sentinel, the host token, and the serialized playback state, all TTL'd
//! to 24 hours from the last write, plus one `session-updates:<key>` topic
//! per session.

use std::sync::Arc;

use async_trait::async_trait;
use matinee_protocol::PlaybackState;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod keys;
mod memory;
mod redis_store;

pub use memory::MemoryKeyspace;
pub use redis_store::RedisKeyspace;

/// Records from the last write live this long.
pub const SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;

/// Depth of the channel a topic subscription feeds.
pub const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum KeyspaceError {
    #[error("keyspace unavailable: {0}")]
    Unavailable(String),
    #[error("stored record malformed: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<redis::RedisError> for KeyspaceError {
    fn from(err: redis::RedisError) -> Self {
        KeyspaceError::Unavailable(err.to_string())
    }
}

/// Operations the director and the streaming nodes need from the keyspace.
///
/// The director is the only writer of the sentinel and host-token keys; any
/// node may write the state key (gated by host role) and publish on the
/// topic.
#[async_trait]
pub trait Keyspace: Send + Sync {
    /// Persist a freshly issued session: sentinel, host token, and initial
    /// state, each TTL'd. Earlier writes are rolled back best-effort when a
    /// later one fails, so a half-created session does not validate.
    async fn create_session(
        &self,
        session_key: &str,
        host_token: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError>;

    async fn session_exists(&self, session_key: &str) -> Result<bool, KeyspaceError>;

    async fn host_token(&self, session_key: &str) -> Result<Option<String>, KeyspaceError>;

    async fn read_state(&self, session_key: &str)
        -> Result<Option<PlaybackState>, KeyspaceError>;

    /// Overwrite the state record and refresh its TTL. Callers are expected
    /// to have applied the last-writer-wins check first, under their own
    /// per-session serialization.
    async fn write_state(
        &self,
        session_key: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError>;

    /// Publish a state on the session's topic for every subscribed node.
    async fn publish_state(
        &self,
        session_key: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError>;

    /// Open a live feed of states published on the session's topic.
    /// Payloads that fail to parse are logged and skipped, not surfaced.
    async fn subscribe_state(
        &self,
        session_key: &str,
    ) -> Result<mpsc::Receiver<PlaybackState>, KeyspaceError>;
}

pub type SharedKeyspace = Arc<dyn Keyspace>;
