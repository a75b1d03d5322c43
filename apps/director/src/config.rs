use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "matinee-director",
    author,
    version,
    about = "Session director: issues sessions and routes joins by live load"
)]
pub struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "MATINEE_DIRECTOR_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Redis connection URI for session facts.
    #[arg(long, env = "MATINEE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// TTL applied to every session record, refreshed on write.
    #[arg(
        long,
        env = "MATINEE_SESSION_TTL_SECS",
        default_value_t = matinee_keyspace::SESSION_TTL_SECONDS
    )]
    session_ttl_secs: u64,

    /// A node that misses heartbeats for this long is dropped.
    #[arg(long, env = "MATINEE_NODE_EXPIRY_SECS", default_value_t = 60)]
    node_expiry_secs: u64,

    /// How often the registry sweeps for expired nodes.
    #[arg(long, env = "MATINEE_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct DirectorConfig {
    pub listen_addr: SocketAddr,
    pub redis_url: String,
    pub session_ttl_seconds: u64,
    pub node_expiry: Duration,
    pub sweep_interval: Duration,
}

impl TryFrom<Cli> for DirectorConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        Ok(DirectorConfig {
            listen_addr,
            redis_url: cli.redis_url,
            session_ttl_seconds: cli.session_ttl_secs,
            node_expiry: Duration::from_secs(cli.node_expiry_secs),
            sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
        })
    }
}
