//! Sync scenarios over real WebSockets: a node (or two) bound to ephemeral
//! ports, backed by the in-memory keyspace, driven with tokio-tungstenite.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use matinee_keyspace::{Keyspace, MemoryKeyspace, SharedKeyspace};
use matinee_node::hub::SyncHub;
use matinee_node::media_store::MemoryMediaStore;
use matinee_node::{build_router, NodeIdentity, NodeState};
use matinee_protocol::viewer::{reconcile, LocalPlayback};
use matinee_protocol::{now_ms, PlaybackState, ServerFrame, VideoManifest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const BASE_TS: i64 = 1_000_000;

static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();

fn metrics_handle() -> PrometheusHandle {
    METRICS
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("install recorder")
        })
        .clone()
}

fn state_at(timestamp: i64, current_time: f64, paused: bool) -> PlaybackState {
    PlaybackState {
        paused,
        current_time,
        playback_rate: 1.0,
        timestamp,
    }
}

async fn spawn_node(
    keyspace: Arc<MemoryKeyspace>,
    media: Arc<MemoryMediaStore>,
    capacity: u32,
) -> SocketAddr {
    let shared: SharedKeyspace = keyspace;
    let hub = SyncHub::new(shared, VideoManifest::default());
    let state = NodeState {
        hub,
        media,
        identity: NodeIdentity {
            id: "node-under-test".to_string(),
            url: "http://localhost:8081".to_string(),
            capacity,
        },
    };
    let app = build_router(state, metrics_handle());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("node serve");
    });
    addr
}

async fn connect(addr: SocketAddr, session: &str, is_host: bool) -> WsStream {
    let url = format!("ws://{}/ws?sessionID={}&isHost={}", addr, session, is_host);
    let (stream, _) = connect_async(url).await.expect("ws connect");
    stream
}

async fn send_state(ws: &mut WsStream, state: &PlaybackState) {
    let frame = json!({ "type": "stateUpdate", "state": state });
    ws.send(Message::Text(frame.to_string()))
        .await
        .expect("send state frame");
}

async fn next_state(ws: &mut WsStream) -> (PlaybackState, i64) {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("state wait timed out")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            match serde_json::from_str::<ServerFrame>(&text).expect("parse server frame") {
                ServerFrame::StateUpdate { state, servertime } => return (state, servertime),
                _ => continue,
            }
        }
    }
}

async fn expect_no_state(ws: &mut WsStream) {
    let outcome = timeout(Duration::from_millis(300), ws.next()).await;
    assert!(
        outcome.is_err(),
        "expected no frame, got {:?}",
        outcome.unwrap()
    );
}

/// Accepted updates can arrive twice (direct broadcast + pub/sub echo);
/// read until the line goes quiet.
async fn drain_states(ws: &mut WsStream) {
    while let Ok(Some(Ok(_))) = timeout(Duration::from_millis(300), ws.next()).await {}
}

#[tokio::test]
async fn host_update_propagates_with_latency_correction() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let addr = spawn_node(keyspace.clone(), Arc::new(MemoryMediaStore::new()), 100).await;

    let mut host = connect(addr, "movie-night", true).await;
    let mut participant = connect(addr, "movie-night", false).await;

    // Joining participants are seeded with the stored state.
    let (initial, _) = next_state(&mut participant).await;
    assert!(initial.paused);
    assert_eq!(initial.current_time, 0.0);

    let update = state_at(BASE_TS + 1_000, 10.0, false);
    send_state(&mut host, &update).await;

    let (received, servertime) = next_state(&mut participant).await;
    assert_eq!(received.current_time, 10.0);
    assert!(!received.paused);
    assert_eq!(received.timestamp, BASE_TS + 1_000);
    assert!((now_ms() - servertime).abs() < 5_000);

    // The viewer-side rules: far behind, so it seeks to the latency-adjusted
    // target and resumes.
    let local = LocalPlayback {
        paused: true,
        position: 0.0,
        rate: 1.0,
    };
    let correction = reconcile(&local, &received, servertime, now_ms());
    assert!(!correction.paused);
    let target = correction.seek_to.expect("drift of 10 s must seek");
    assert!((target - 10.0).abs() < 1.0);

    // The write is durable for late joiners.
    assert_eq!(
        keyspace
            .read_state("movie-night")
            .await
            .unwrap()
            .unwrap()
            .timestamp,
        BASE_TS + 1_000
    );
}

#[tokio::test]
async fn late_joiner_first_sees_latest_accepted_state() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let addr = spawn_node(keyspace, Arc::new(MemoryMediaStore::new()), 100).await;

    let mut host = connect(addr, "movie-night", true).await;
    send_state(&mut host, &state_at(BASE_TS + 2_000, 42.0, false)).await;
    // The host's own echo confirms the write landed before the join.
    let (echo, _) = next_state(&mut host).await;
    assert_eq!(echo.timestamp, BASE_TS + 2_000);

    let mut late_joiner = connect(addr, "movie-night", false).await;
    let (first, _) = next_state(&mut late_joiner).await;
    assert_eq!(first.current_time, 42.0);
    assert_eq!(first.timestamp, BASE_TS + 2_000);
}

#[tokio::test]
async fn stale_host_write_changes_nothing() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let addr = spawn_node(keyspace.clone(), Arc::new(MemoryMediaStore::new()), 100).await;

    let mut host = connect(addr, "movie-night", true).await;
    let mut participant = connect(addr, "movie-night", false).await;

    send_state(&mut host, &state_at(BASE_TS + 5_000, 7.0, false)).await;
    drain_states(&mut participant).await;

    // Older timestamp: discarded, no broadcast, stored state untouched.
    send_state(&mut host, &state_at(BASE_TS + 4_000, 99.0, false)).await;
    expect_no_state(&mut participant).await;

    let stored = keyspace.read_state("movie-night").await.unwrap().unwrap();
    assert_eq!(stored.timestamp, BASE_TS + 5_000);
    assert_eq!(stored.current_time, 7.0);
}

#[tokio::test]
async fn updates_fan_out_across_nodes() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let node_a = spawn_node(keyspace.clone(), Arc::new(MemoryMediaStore::new()), 100).await;
    let node_b = spawn_node(keyspace, Arc::new(MemoryMediaStore::new()), 100).await;

    let mut host = connect(node_a, "movie-night", true).await;
    let mut remote_participant = connect(node_b, "movie-night", false).await;
    let (initial, _) = next_state(&mut remote_participant).await;
    assert_eq!(initial.timestamp, BASE_TS);

    send_state(&mut host, &state_at(BASE_TS + 1_000, 25.0, false)).await;

    let (received, _) = next_state(&mut remote_participant).await;
    assert_eq!(received.current_time, 25.0);
    assert_eq!(received.timestamp, BASE_TS + 1_000);
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_connection() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let addr = spawn_node(keyspace, Arc::new(MemoryMediaStore::new()), 100).await;

    let mut host = connect(addr, "movie-night", true).await;
    let mut participant = connect(addr, "movie-night", false).await;
    let (_, _) = next_state(&mut participant).await;

    host.send(Message::Text("this is not json".to_string()))
        .await
        .expect("send garbage");
    host.send(Message::Text(r#"{"type":"chatMessage"}"#.to_string()))
        .await
        .expect("send unknown type");

    // The loop skipped both and still processes real updates.
    send_state(&mut host, &state_at(BASE_TS + 1_000, 3.0, false)).await;
    let (received, _) = next_state(&mut participant).await;
    assert_eq!(received.current_time, 3.0);
}

#[tokio::test]
async fn video_metadata_is_answered_to_the_requester() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let addr = spawn_node(keyspace, Arc::new(MemoryMediaStore::new()), 100).await;

    let mut host = connect(addr, "movie-night", true).await;
    host.send(Message::Text(r#"{"type":"videoMetadata"}"#.to_string()))
        .await
        .expect("send metadata request");

    let message = timeout(Duration::from_secs(2), host.next())
        .await
        .expect("manifest wait timed out")
        .expect("socket closed")
        .expect("socket error");
    let Message::Text(text) = message else {
        panic!("unexpected frame: {message:?}");
    };
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["type"], "videoMetadata");
    assert_eq!(body["state"]["chunkDuration"], 5);
    assert_eq!(body["state"]["videoFileType"], "mp4");
}

#[tokio::test]
async fn missing_session_id_is_rejected_before_upgrade() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    let addr = spawn_node(keyspace, Arc::new(MemoryMediaStore::new()), 100).await;

    let error = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect_err("upgrade must be refused");
    match error {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 400);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn at_capacity_node_refuses_the_upgrade() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let addr = spawn_node(keyspace, Arc::new(MemoryMediaStore::new()), 1).await;

    let mut first = connect(addr, "movie-night", false).await;
    // The initial frame proves the first viewer is fully attached.
    let (_, _) = next_state(&mut first).await;

    let error = connect_async(format!(
        "ws://{}/ws?sessionID=movie-night&isHost=false",
        addr
    ))
    .await
    .expect_err("over-capacity upgrade must be refused");
    match error {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 503);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Departure frees the slot.
    first.close(None).await.expect("close first viewer");
    let client = reqwest::Client::new();
    let mut freed = false;
    for _ in 0..50 {
        let status: Value = client
            .get(format!("http://{}/status", addr))
            .send()
            .await
            .expect("status request")
            .json()
            .await
            .expect("status body");
        if status["currentLoad"] == 0 {
            freed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(freed, "load counter never returned to zero");

    let _replacement = connect(addr, "movie-night", false).await;
}

#[tokio::test]
async fn status_reports_identity_and_live_load() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    keyspace
        .create_session("movie-night", "token", &state_at(BASE_TS, 0.0, true))
        .await
        .unwrap();
    let addr = spawn_node(keyspace, Arc::new(MemoryMediaStore::new()), 100).await;

    let mut viewer = connect(addr, "movie-night", false).await;
    let (_, _) = next_state(&mut viewer).await;

    let status: Value = reqwest::get(format!("http://{}/status", addr))
        .await
        .expect("status request")
        .json()
        .await
        .expect("status body");
    assert_eq!(status["id"], "node-under-test");
    assert_eq!(status["capacity"], 100);
    assert_eq!(status["currentLoad"], 1);
    assert_eq!(status["status"], "active");
}

#[tokio::test]
async fn hls_read_path_proxies_the_object_store() {
    let keyspace = Arc::new(MemoryKeyspace::new());
    let media = Arc::new(MemoryMediaStore::new());
    media.insert("movie-night/master.m3u8", "#EXTM3U\n#master\n");
    media.insert("movie-night/720p/playlist.m3u8", "#EXTM3U\n#720p\n");
    media.insert("movie-night/720p/seg0.ts", &b"\x47segment-bytes"[..]);
    let addr = spawn_node(keyspace, media, 100).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/hls/movie-night/master.m3u8", addr))
        .send()
        .await
        .expect("master request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/vnd.apple.mpegurl")
    );
    assert_eq!(response.text().await.unwrap(), "#EXTM3U\n#master\n");

    let response = client
        .get(format!(
            "http://{}/hls/movie-night/720p/playlist.m3u8",
            addr
        ))
        .send()
        .await
        .expect("playlist request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "#EXTM3U\n#720p\n");

    let response = client
        .get(format!("http://{}/hls/movie-night/720p/seg0.ts", addr))
        .send()
        .await
        .expect("segment request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("video/MP2T")
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"\x47segment-bytes");

    // Missing objects are a plain 404.
    let response = client
        .get(format!("http://{}/hls/other-session/master.m3u8", addr))
        .send()
        .await
        .expect("missing request");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    // Traversal-shaped segment names are refused outright.
    let response = client
        .get(format!("http://{}/hls/movie-night/720p/a..b.ts", addr))
        .send()
        .await
        .expect("traversal request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}
