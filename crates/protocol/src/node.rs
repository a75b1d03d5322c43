use serde::{Deserialize, Serialize};

/// What a streaming node tells the director about itself, both at
/// registration and on every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Node-assigned identifier; stable across heartbeats.
    pub id: String,
    /// Externally reachable base URL viewers connect to.
    pub url: String,
    /// Maximum concurrent viewers the node will accept.
    pub capacity: u32,
    /// Live viewer count as reported by the node.
    pub current_load: u32,
}

impl NodeDescriptor {
    pub fn with_load(&self, current_load: u32) -> Self {
        Self {
            current_load,
            ..self.clone()
        }
    }
}
