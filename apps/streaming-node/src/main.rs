use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use matinee_keyspace::{RedisKeyspace, SharedKeyspace};
use matinee_node::config::{Cli, NodeConfig};
use matinee_node::director_client::{spawn_heartbeat, DirectorClient};
use matinee_node::hub::SyncHub;
use matinee_node::media_store::{HttpMediaStore, SharedMediaStore};
use matinee_node::{build_router, NodeIdentity, NodeState};
use matinee_protocol::NodeDescriptor;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn install_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = NodeConfig::try_from(cli)?;
    info!(
        node = %config.node_id,
        listen_addr = %config.listen_addr,
        public_url = %config.public_url,
        director = %config.director_url,
        capacity = config.capacity,
        "starting matinee streaming node"
    );

    let recorder = install_metrics_recorder();

    let keyspace: SharedKeyspace =
        match RedisKeyspace::connect(&config.redis_url, config.session_ttl_seconds).await {
            Ok(keyspace) => Arc::new(keyspace),
            Err(err) => {
                error!(error = %err, "failed to connect to redis");
                std::process::exit(1);
            }
        };

    let hub = SyncHub::new(keyspace, config.manifest.clone());
    let media: SharedMediaStore = Arc::new(HttpMediaStore::new(config.media_base_url.clone()));
    let identity = NodeIdentity {
        id: config.node_id.clone(),
        url: config.public_url.clone(),
        capacity: config.capacity,
    };

    let state = NodeState {
        hub: hub.clone(),
        media,
        identity,
    };
    let app = build_router(state, recorder);

    let descriptor = NodeDescriptor {
        id: config.node_id.clone(),
        url: config.public_url.clone(),
        capacity: config.capacity,
        current_load: 0,
    };
    let director = DirectorClient::new(config.director_url.clone());
    director
        .register(&descriptor)
        .await
        .context("failed to register with director")?;
    info!(director = %config.director_url, "registered with director");
    spawn_heartbeat(director, hub, descriptor, config.heartbeat_interval);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("matinee node listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .context("server exited with error")?;

    Ok(())
}
