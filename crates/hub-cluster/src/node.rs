use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// NodeTable — leader-side follower bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_id: String,
    pub node_addr: String,
    pub last_seen: DateTime<Utc>,
    /// Last sync failure past the retry budget, cleared by the next success.
    pub last_error: Option<String>,
    /// Latest metrics sample pushed by the follower.
    pub last_metrics: Option<serde_json::Value>,
}

/// Known followers, keyed by node id. New followers auto-register on their
/// first heartbeat; a follower is unhealthy once its last heartbeat is older
/// than `miss_threshold × heartbeat_interval`.
#[derive(Debug)]
pub struct NodeTable {
    nodes: RwLock<HashMap<String, NodeInfo>>,
    unhealthy_after: Duration,
}

impl NodeTable {
    pub fn new(unhealthy_after: Duration) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            unhealthy_after,
        }
    }

    pub fn observe_heartbeat(&self, node_id: &str, node_addr: &str) {
        let mut nodes = self.nodes.write().expect("lock poisoned");
        let entry = nodes.entry(node_id.to_string()).or_insert_with(|| NodeInfo {
            node_id: node_id.to_string(),
            node_addr: node_addr.to_string(),
            last_seen: Utc::now(),
            last_error: None,
            last_metrics: None,
        });
        entry.node_addr = node_addr.to_string();
        entry.last_seen = Utc::now();
    }

    pub fn record_metrics(&self, node_id: &str, metrics: serde_json::Value) {
        if let Some(entry) = self.nodes.write().expect("lock poisoned").get_mut(node_id) {
            entry.last_metrics = Some(metrics);
        }
    }

    pub fn record_sync_failure(&self, node_id: &str, error: &str) {
        if let Some(entry) = self.nodes.write().expect("lock poisoned").get_mut(node_id) {
            entry.last_error = Some(error.to_string());
        }
    }

    pub fn record_sync_success(&self, node_id: &str) {
        if let Some(entry) = self.nodes.write().expect("lock poisoned").get_mut(node_id) {
            entry.last_error = None;
        }
    }

    pub fn is_healthy(&self, info: &NodeInfo) -> bool {
        let age = Utc::now().signed_duration_since(info.last_seen);
        age.to_std().map(|d| d <= self.unhealthy_after).unwrap_or(true)
    }

    /// Followers currently within the heartbeat window.
    pub fn healthy_nodes(&self) -> Vec<NodeInfo> {
        let mut out: Vec<NodeInfo> = self
            .nodes
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|n| self.is_healthy(n))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }

    pub fn all_nodes(&self) -> Vec<NodeInfo> {
        let mut out: Vec<NodeInfo> = self
            .nodes
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_auto_registers_and_refreshes() {
        let table = NodeTable::new(Duration::from_secs(15));
        table.observe_heartbeat("w1", "http://10.0.0.2:8900");
        table.observe_heartbeat("w2", "http://10.0.0.3:8900");
        assert_eq!(table.healthy_nodes().len(), 2);

        // Address changes are picked up on the next heartbeat.
        table.observe_heartbeat("w1", "http://10.0.0.9:8900");
        assert_eq!(table.all_nodes()[0].node_addr, "http://10.0.0.9:8900");
    }

    #[test]
    fn stale_nodes_drop_out_of_healthy_set() {
        let table = NodeTable::new(Duration::from_millis(0));
        table.observe_heartbeat("w1", "addr");
        std::thread::sleep(Duration::from_millis(5));
        assert!(table.healthy_nodes().is_empty());
        assert_eq!(table.all_nodes().len(), 1);
    }

    #[test]
    fn sync_failures_are_surfaced_and_cleared() {
        let table = NodeTable::new(Duration::from_secs(15));
        table.observe_heartbeat("w1", "addr");
        table.record_sync_failure("w1", "connection refused");
        assert_eq!(
            table.all_nodes()[0].last_error.as_deref(),
            Some("connection refused")
        );
        table.record_sync_success("w1");
        assert!(table.all_nodes()[0].last_error.is_none());
    }
}
