//! Fleet membership: registration and the periodic heartbeat that reports
//! live load to the director.

use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::warn;

use matinee_protocol::NodeDescriptor;

use crate::hub::SyncHub;

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status}")]
    UnexpectedStatus { status: reqwest::StatusCode },
}

#[derive(Clone)]
pub struct DirectorClient {
    http: reqwest::Client,
    base_url: String,
}

impl DirectorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn register(&self, descriptor: &NodeDescriptor) -> Result<(), DirectorError> {
        self.post("/api/streaming-servers/register", descriptor)
            .await
    }

    pub async fn heartbeat(&self, descriptor: &NodeDescriptor) -> Result<(), DirectorError> {
        self.post("/api/streaming-servers/heartbeat", descriptor)
            .await
    }

    async fn post(&self, path: &str, descriptor: &NodeDescriptor) -> Result<(), DirectorError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(url).json(descriptor).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DirectorError::UnexpectedStatus {
                status: response.status(),
            })
        }
    }
}

/// Report the live connection count every interval. Failures are logged and
/// retried on the next tick; the director drops us if we stay silent.
pub fn spawn_heartbeat(
    client: DirectorClient,
    hub: SyncHub,
    descriptor: NodeDescriptor,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Registration already announced us; skip the immediate tick.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let load = hub.current_load() as u32;
            if let Err(err) = client.heartbeat(&descriptor.with_load(load)).await {
                warn!(error = %err, "heartbeat to director failed");
            }
        }
    })
}
