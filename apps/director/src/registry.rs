//! Live registry of streaming nodes and the load-based selection over it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use matinee_protocol::NodeDescriptor;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_NODE_EXPIRY: Duration = Duration::from_secs(60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub descriptor: NodeDescriptor,
    pub status: NodeStatus,
    pub last_ping: Instant,
}

impl NodeEntry {
    fn load_ratio(&self) -> f64 {
        self.descriptor.current_load as f64 / self.descriptor.capacity as f64
    }

    fn selectable(&self) -> bool {
        self.status == NodeStatus::Active
            && self.descriptor.capacity > 0
            && self.descriptor.current_load < self.descriptor.capacity
    }
}

/// Least-loaded pick: smallest `current_load / capacity` among selectable
/// entries, ties broken by the lexically smallest id so a repeated call over
/// the same snapshot returns the same node.
fn pick<'a>(entries: impl Iterator<Item = &'a NodeEntry>) -> Option<&'a NodeEntry> {
    entries.filter(|entry| entry.selectable()).min_by(|a, b| {
        a.load_ratio()
            .partial_cmp(&b.load_ratio())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.descriptor.id.cmp(&b.descriptor.id))
    })
}

/// Viewers connect to `http(s)://host[:port]`; nodes sometimes register a
/// bare authority or a trailing slash.
pub fn normalize_streaming_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, NodeEntry>>,
    expiry: Duration,
}

impl NodeRegistry {
    pub fn new(expiry: Duration) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            expiry,
        }
    }

    /// Insert or replace the entry; a re-register after expiry lands here.
    pub async fn register(&self, descriptor: NodeDescriptor) {
        let mut nodes = self.nodes.write().await;
        info!(
            node = %descriptor.id,
            url = %descriptor.url,
            capacity = descriptor.capacity,
            "registered streaming node"
        );
        nodes.insert(
            descriptor.id.clone(),
            NodeEntry {
                descriptor,
                status: NodeStatus::Active,
                last_ping: Instant::now(),
            },
        );
    }

    /// Refresh load and liveness for a known node. Heartbeats for unknown
    /// ids are ignored; a node whose entry expired must register again.
    pub async fn heartbeat(&self, descriptor: &NodeDescriptor) -> bool {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(&descriptor.id) {
            Some(entry) => {
                entry.descriptor = descriptor.clone();
                entry.status = NodeStatus::Active;
                entry.last_ping = Instant::now();
                true
            }
            None => {
                debug!(node = %descriptor.id, "heartbeat for unknown node ignored");
                false
            }
        }
    }

    /// Point-in-time selection under the read lock. No reservation is made;
    /// the node's own admission enforces capacity.
    pub async fn select(&self) -> Option<String> {
        let nodes = self.nodes.read().await;
        pick(nodes.values()).map(|entry| normalize_streaming_url(&entry.descriptor.url))
    }

    /// Drop entries that have not pinged within the expiry window.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let mut nodes = self.nodes.write().await;
        let stale: Vec<String> = nodes
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_ping) > self.expiry)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            nodes.remove(id);
            info!(node = %id, "removed streaming node after missed heartbeats");
        }
        stale
    }
}

pub fn spawn_sweeper(registry: Arc<NodeRegistry>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep_expired().await;
            if !removed.is_empty() {
                debug!(count = removed.len(), "expiry sweep removed nodes");
            }
        }
    })
}
