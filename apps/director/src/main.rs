use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use matinee_director::config::{Cli, DirectorConfig};
use matinee_director::handlers::AppState;
use matinee_director::registry::{spawn_sweeper, NodeRegistry};
use matinee_director::build_router;
use matinee_keyspace::{RedisKeyspace, SharedKeyspace};

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
    let config = DirectorConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        redis_url = %config.redis_url,
        session_ttl_secs = config.session_ttl_seconds,
        node_expiry_secs = config.node_expiry.as_secs(),
        "starting matinee director"
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

    let registry = Arc::new(NodeRegistry::new(config.node_expiry));
    spawn_sweeper(registry.clone(), config.sweep_interval);

    let state = AppState { keyspace, registry };
    let app = build_router(state, recorder);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("matinee director listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .context("server exited with error")?;

    Ok(())
}
