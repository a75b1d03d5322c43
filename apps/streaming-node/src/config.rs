use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use uuid::Uuid;

use matinee_protocol::VideoManifest;

#[derive(Debug, Parser)]
#[command(
    name = "matinee-node",
    author,
    version,
    about = "Streaming node: terminates viewer WebSockets and proxies media"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "MATINEE_NODE_LISTEN_ADDR", default_value = "0.0.0.0:8081")]
    listen_addr: String,

    /// Redis connection URI for session state and topics.
    #[arg(long, env = "MATINEE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Base URL of the session director.
    #[arg(long, env = "MATINEE_DIRECTOR_URL", default_value = "http://127.0.0.1:8080")]
    director_url: String,

    /// Stable node identifier; generated when not set.
    #[arg(long, env = "MATINEE_NODE_ID")]
    node_id: Option<String>,

    /// Externally reachable base URL advertised to the director; defaults
    /// to localhost on the listen port.
    #[arg(long, env = "MATINEE_NODE_PUBLIC_URL")]
    public_url: Option<String>,

    /// Maximum concurrent viewers admitted.
    #[arg(long, env = "MATINEE_NODE_CAPACITY", default_value_t = 100)]
    capacity: u32,

    /// Seconds between heartbeats to the director.
    #[arg(long, env = "MATINEE_HEARTBEAT_SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Base URL of the object-store gateway holding playlists and segments.
    #[arg(
        long,
        env = "MATINEE_MEDIA_BASE_URL",
        default_value = "http://127.0.0.1:9000/matinee-media"
    )]
    media_base_url: String,

    /// TTL applied to state writes, refreshed on every accepted update.
    #[arg(
        long,
        env = "MATINEE_SESSION_TTL_SECS",
        default_value_t = matinee_keyspace::SESSION_TTL_SECONDS
    )]
    session_ttl_secs: u64,

    /// Manifest shape of the deployed media.
    #[arg(long, env = "MATINEE_CHUNK_DURATION_SECS", default_value_t = 5)]
    chunk_duration: u32,
    #[arg(long, env = "MATINEE_CHUNK_COUNT", default_value_t = 10)]
    chunk_count: u32,
    #[arg(long, env = "MATINEE_VIDEO_DURATION_SECS", default_value_t = 117.0)]
    video_duration: f64,
    #[arg(long, env = "MATINEE_VIDEO_FILE_TYPE", default_value = "mp4")]
    video_file_type: String,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub redis_url: String,
    pub director_url: String,
    pub node_id: String,
    pub public_url: String,
    pub capacity: u32,
    pub heartbeat_interval: Duration,
    pub media_base_url: String,
    pub session_ttl_seconds: u64,
    pub manifest: VideoManifest,
}

impl TryFrom<Cli> for NodeConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        let node_id = cli.node_id.unwrap_or_else(generate_node_id);
        let public_url = cli
            .public_url
            .unwrap_or_else(|| format!("http://localhost:{}", listen_addr.port()));

        Ok(NodeConfig {
            listen_addr,
            redis_url: cli.redis_url,
            director_url: cli.director_url,
            node_id,
            public_url,
            capacity: cli.capacity,
            heartbeat_interval: Duration::from_secs(cli.heartbeat_secs),
            media_base_url: cli.media_base_url,
            session_ttl_seconds: cli.session_ttl_secs,
            manifest: VideoManifest {
                chunk_duration: cli.chunk_duration,
                chunk_count: cli.chunk_count,
                video_duration: cli.video_duration,
                video_file_type: cli.video_file_type,
            },
        })
    }
}

fn generate_node_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("node-{}", &suffix[..8])
}
