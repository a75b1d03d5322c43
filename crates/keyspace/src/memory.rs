use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use matinee_protocol::PlaybackState;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::{Keyspace, KeyspaceError, SUBSCRIPTION_BUFFER};

#[derive(Default)]
struct Records {
    sentinels: HashSet<String>,
    host_tokens: HashMap<String, String>,
    states: HashMap<String, PlaybackState>,
}

/// In-process keyspace used by tests and single-node development runs.
///
/// Topics are per-session `broadcast` channels; TTLs are accepted and
/// ignored (nothing expires). `set_unavailable` simulates a storage outage
/// so callers' failure paths can be exercised without Redis.
#[derive(Default)]
pub struct MemoryKeyspace {
    records: Mutex<Records>,
    topics: Mutex<HashMap<String, broadcast::Sender<PlaybackState>>>,
    unavailable: AtomicBool,
}

impl MemoryKeyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), KeyspaceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KeyspaceError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn topic_sender(&self, session_key: &str) -> broadcast::Sender<PlaybackState> {
        self.topics
            .lock()
            .expect("topic map poisoned")
            .entry(session_key.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl Keyspace for MemoryKeyspace {
    async fn create_session(
        &self,
        session_key: &str,
        host_token: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError> {
        self.guard()?;
        let mut records = self.records.lock().expect("record map poisoned");
        records.sentinels.insert(session_key.to_string());
        records
            .host_tokens
            .insert(session_key.to_string(), host_token.to_string());
        records.states.insert(session_key.to_string(), *state);
        Ok(())
    }

    async fn session_exists(&self, session_key: &str) -> Result<bool, KeyspaceError> {
        self.guard()?;
        let records = self.records.lock().expect("record map poisoned");
        Ok(records.sentinels.contains(session_key))
    }

    async fn host_token(&self, session_key: &str) -> Result<Option<String>, KeyspaceError> {
        self.guard()?;
        let records = self.records.lock().expect("record map poisoned");
        Ok(records.host_tokens.get(session_key).cloned())
    }

    async fn read_state(
        &self,
        session_key: &str,
    ) -> Result<Option<PlaybackState>, KeyspaceError> {
        self.guard()?;
        let records = self.records.lock().expect("record map poisoned");
        Ok(records.states.get(session_key).copied())
    }

    async fn write_state(
        &self,
        session_key: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError> {
        self.guard()?;
        let mut records = self.records.lock().expect("record map poisoned");
        records.states.insert(session_key.to_string(), *state);
        Ok(())
    }

    async fn publish_state(
        &self,
        session_key: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError> {
        self.guard()?;
        // A send error just means no node is subscribed yet.
        let _ = self.topic_sender(session_key).send(*state);
        Ok(())
    }

    async fn subscribe_state(
        &self,
        session_key: &str,
    ) -> Result<mpsc::Receiver<PlaybackState>, KeyspaceError> {
        self.guard()?;
        let mut topic_rx = self.topic_sender(session_key).subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            loop {
                match topic_rx.recv().await {
                    Ok(state) => {
                        if tx.send(state).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "memory topic subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}
