use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::node::NodeTable;

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub node_addr: String,
    pub healthy: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_metrics: Option<serde_json::Value>,
}

/// Response body of `GET /cluster/status`.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub role: String,
    pub node_id: String,
    pub nodes: Vec<NodeStatus>,
}

impl ClusterStatus {
    pub fn from_table(role: &str, node_id: &str, table: &NodeTable) -> Self {
        let nodes = table
            .all_nodes()
            .into_iter()
            .map(|info| NodeStatus {
                healthy: table.is_healthy(&info),
                node_id: info.node_id,
                node_addr: info.node_addr,
                last_seen: info.last_seen,
                last_error: info.last_error,
                last_metrics: info.last_metrics,
            })
            .collect();
        Self {
            role: role.to_string(),
            node_id: node_id.to_string(),
            nodes,
        }
    }
}
