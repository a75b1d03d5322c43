//! Per-session fan-out: local viewer buckets, host-authoritative state
//! writes, and the bridge between the session topic and local sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, error, warn};
use uuid::Uuid;

use matinee_keyspace::SharedKeyspace;
use matinee_protocol::{now_ms, ClientFrame, PlaybackState, ServerFrame, VideoManifest};

/// Outbound frames queued per connection before drops kick in.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

#[derive(Clone)]
struct ViewerHandle {
    is_host: bool,
    tx: mpsc::Sender<ServerFrame>,
}

/// Shared fan-out state. Cloning is cheap; every clone works on the same
/// buckets and counters.
#[derive(Clone)]
pub struct SyncHub {
    keyspace: SharedKeyspace,
    manifest: VideoManifest,
    /// session id -> locally attached viewers. Bucket mutations and the
    /// snapshot taken before a broadcast run under the entry's shard lock;
    /// queue sends happen after release.
    sessions: Arc<DashMap<String, HashMap<Uuid, ViewerHandle>>>,
    /// Per-session serialization of the read-compare-write on the state key.
    write_guards: Arc<DashMap<String, Arc<Mutex<()>>>>,
    /// One topic subscription per session with local viewers; never torn
    /// down on last-departure.
    subscriptions: Arc<DashMap<String, Arc<OnceCell<()>>>>,
    load: Arc<AtomicUsize>,
}

impl SyncHub {
    pub fn new(keyspace: SharedKeyspace, manifest: VideoManifest) -> Self {
        Self {
            keyspace,
            manifest,
            sessions: Arc::new(DashMap::new()),
            write_guards: Arc::new(DashMap::new()),
            subscriptions: Arc::new(DashMap::new()),
            load: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Live local connection count across all sessions.
    pub fn current_load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    /// Register a viewer: bucket entry, load counter, topic subscription,
    /// and (for participants) the stored state as their first frame.
    pub async fn attach(
        &self,
        session_id: &str,
        is_host: bool,
    ) -> (Uuid, mpsc::Receiver<ServerFrame>) {
        let viewer_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(viewer_id, ViewerHandle { is_host, tx });
        self.load.fetch_add(1, Ordering::SeqCst);

        self.ensure_subscribed(session_id).await;

        if !is_host {
            self.send_initial_state(session_id, viewer_id).await;
        }

        debug!(session = %session_id, viewer = %viewer_id, is_host, "viewer attached");
        (viewer_id, rx)
    }

    /// Remove a viewer and give back its load slot. Dropping the bucket's
    /// sender closes the queue, which stops the connection's writer pump.
    pub fn detach(&self, session_id: &str, viewer_id: Uuid) {
        let mut removed = false;
        let mut bucket_empty = false;
        if let Some(mut bucket) = self.sessions.get_mut(session_id) {
            removed = bucket.remove(&viewer_id).is_some();
            bucket_empty = bucket.is_empty();
        }
        if bucket_empty {
            self.sessions
                .remove_if(session_id, |_, bucket| bucket.is_empty());
        }
        if removed {
            self.load.fetch_sub(1, Ordering::SeqCst);
            debug!(session = %session_id, viewer = %viewer_id, "viewer detached");
        }
    }

    /// The connection's role was fixed at attach time; the bucket record is
    /// authoritative. Frames from connections no longer attached are dropped.
    pub async fn handle_frame(&self, session_id: &str, viewer_id: Uuid, frame: ClientFrame) {
        let is_host = match self
            .sessions
            .get(session_id)
            .and_then(|bucket| bucket.get(&viewer_id).map(|handle| handle.is_host))
        {
            Some(is_host) => is_host,
            None => return,
        };

        match frame {
            ClientFrame::StateUpdate { state } => {
                if !is_host {
                    debug!(session = %session_id, viewer = %viewer_id, "ignoring state update from non-host");
                    return;
                }
                self.apply_host_update(session_id, state).await;
            }
            ClientFrame::VideoMetadata => {
                self.deliver(
                    session_id,
                    viewer_id,
                    ServerFrame::VideoMetadata {
                        state: self.manifest.clone(),
                    },
                );
            }
            ClientFrame::Heartbeat => {
                self.deliver(session_id, viewer_id, ServerFrame::HeartbeatAck);
            }
            ClientFrame::HeartbeatAck => {}
        }
    }

    /// Host write path: read-compare-write under the session's guard, then
    /// topic publish, then an immediate local broadcast so local viewers do
    /// not wait for the pub/sub round trip.
    async fn apply_host_update(&self, session_id: &str, incoming: PlaybackState) {
        let guard = self
            .write_guards
            .entry(session_id.to_string())
            .or_default()
            .clone();
        let serialized = guard.lock().await;

        let stored = match self.keyspace.read_state(session_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                warn!(session = %session_id, "state update for expired session dropped");
                return;
            }
            Err(err) => {
                error!(session = %session_id, error = %err, "stored state read failed");
                return;
            }
        };

        if !incoming.supersedes(&stored) {
            counter!("matinee_state_updates_total", 1, "outcome" => "stale");
            debug!(
                session = %session_id,
                incoming = incoming.timestamp,
                stored = stored.timestamp,
                "discarding stale state update"
            );
            return;
        }

        if let Err(err) = self.keyspace.write_state(session_id, &incoming).await {
            error!(session = %session_id, error = %err, "state write failed");
            return;
        }
        counter!("matinee_state_updates_total", 1, "outcome" => "accepted");

        if let Err(err) = self.keyspace.publish_state(session_id, &incoming).await {
            // The state key stays canonical; subscribers converge on the
            // next host action or a fresh join.
            warn!(session = %session_id, error = %err, "publish after accepted write failed");
        }

        drop(serialized);
        self.broadcast_local(session_id, incoming);
    }

    /// Fan a state out to every locally attached viewer of the session,
    /// stamped with this node's wall time. Full queues drop their copy.
    pub fn broadcast_local(&self, session_id: &str, state: PlaybackState) {
        let targets: Vec<(Uuid, mpsc::Sender<ServerFrame>)> = match self.sessions.get(session_id)
        {
            Some(bucket) => bucket
                .iter()
                .map(|(id, handle)| (*id, handle.tx.clone()))
                .collect(),
            None => return,
        };

        let servertime = now_ms();
        for (viewer_id, tx) in targets {
            self.try_enqueue(
                session_id,
                viewer_id,
                &tx,
                ServerFrame::StateUpdate { state, servertime },
            );
        }
    }

    async fn send_initial_state(&self, session_id: &str, viewer_id: Uuid) {
        match self.keyspace.read_state(session_id).await {
            Ok(Some(state)) => {
                self.deliver(
                    session_id,
                    viewer_id,
                    ServerFrame::StateUpdate {
                        state,
                        servertime: now_ms(),
                    },
                );
            }
            Ok(None) => {
                warn!(session = %session_id, "no stored state for joining viewer");
            }
            Err(err) => {
                error!(session = %session_id, error = %err, "initial state read failed");
            }
        }
    }

    fn deliver(&self, session_id: &str, viewer_id: Uuid, frame: ServerFrame) {
        let tx = self
            .sessions
            .get(session_id)
            .and_then(|bucket| bucket.get(&viewer_id).map(|handle| handle.tx.clone()));
        if let Some(tx) = tx {
            self.try_enqueue(session_id, viewer_id, &tx, frame);
        }
    }

    fn try_enqueue(
        &self,
        session_id: &str,
        viewer_id: Uuid,
        tx: &mpsc::Sender<ServerFrame>,
        frame: ServerFrame,
    ) {
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counter!("matinee_frames_dropped_total", 1, "reason" => "queue_full");
                warn!(session = %session_id, viewer = %viewer_id, "outbound queue full, dropping frame");
            }
            // The viewer is tearing down; disconnect cleanup handles it.
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// First local viewer of a session opens the topic feed. The cell keeps
    /// concurrent joiners from double-subscribing.
    async fn ensure_subscribed(&self, session_id: &str) {
        let cell = self
            .subscriptions
            .entry(session_id.to_string())
            .or_default()
            .clone();

        cell.get_or_init(|| async {
            match self.keyspace.subscribe_state(session_id).await {
                Ok(mut feed) => {
                    let hub = self.clone();
                    let session = session_id.to_string();
                    tokio::spawn(async move {
                        while let Some(state) = feed.recv().await {
                            hub.broadcast_local(&session, state);
                        }
                        debug!(session = %session, "topic feed ended");
                    });
                }
                Err(err) => {
                    error!(session = %session_id, error = %err, "topic subscribe failed");
                }
            }
        })
        .await;
    }
}
