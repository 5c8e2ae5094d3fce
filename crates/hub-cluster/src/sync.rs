use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orion_error::prelude::*;
use serde::{Deserialize, Serialize};

use hub_config::ComponentKind;

use crate::error::{ClusterReason, ClusterResult};
use crate::node::NodeTable;

/// Per-follower retry budget with linear backoff (1s, 2s, 3s).
const SYNC_RETRIES: u32 = 3;
const SYNC_BACKOFF_STEP: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// One leader→follower configuration delta.
///
/// `type` is `ruleset|input|output|project|plugin` for a full replace, or
/// `<kind>_delete` for a removal. Projects carry `is_running` so followers
/// mirror the leader's run-state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    pub version: u64,
}

impl SyncPayload {
    pub fn upsert(
        kind: ComponentKind,
        id: &str,
        raw: &str,
        is_running: Option<bool>,
        version: u64,
    ) -> Self {
        Self {
            kind: kind.dir().to_string(),
            id: id.to_string(),
            raw: Some(raw.to_string()),
            is_running,
            version,
        }
    }

    pub fn delete(kind: ComponentKind, id: &str, version: u64) -> Self {
        Self {
            kind: format!("{}_delete", kind.dir()),
            id: id.to_string(),
            raw: None,
            is_running: None,
            version,
        }
    }

    /// Split the wire `type` into `(kind, is_delete)`.
    pub fn parse_kind(&self) -> ClusterResult<(ComponentKind, bool)> {
        let (name, deleted) = match self.kind.strip_suffix("_delete") {
            Some(name) => (name, true),
            None => (self.kind.as_str(), false),
        };
        let kind = ComponentKind::from_str(name).map_err(|e| {
            StructError::from(ClusterReason::Sync).with_detail(format!("bad sync type: {e}"))
        })?;
        Ok((kind, deleted))
    }
}

// ---------------------------------------------------------------------------
// Follower-side version gate
// ---------------------------------------------------------------------------

/// At-most-once-per-version guard: a follower applies a payload only when its
/// version is newer than the last one seen for that `(type, id)`.
#[derive(Debug, Default)]
pub struct SeenVersions {
    seen: Mutex<HashMap<(String, String), u64>>,
}

impl SeenVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true (and records the version) when this payload has not been
    /// applied yet; re-deliveries and stale retries return false.
    pub fn fresh(&self, payload: &SyncPayload) -> bool {
        let mut seen = self.seen.lock().expect("lock poisoned");
        let key = (payload.kind.clone(), payload.id.clone());
        match seen.get(&key) {
            Some(&v) if v >= payload.version => false,
            _ => {
                seen.insert(key, payload.version);
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Leader-side broadcaster
// ---------------------------------------------------------------------------

/// Pushes applied changes to every healthy follower with best-effort retries.
///
/// Failures past the retry budget are logged and surfaced through the node
/// table; the next applied change re-synchronizes (payloads are idempotent
/// per `(type, id)` and version-gated on the follower).
pub struct SyncBroadcaster {
    client: reqwest::Client,
    token: String,
    nodes: Arc<NodeTable>,
    version: AtomicU64,
}

impl SyncBroadcaster {
    pub fn new(token: impl Into<String>, nodes: Arc<NodeTable>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            nodes,
            version: AtomicU64::new(1),
        }
    }

    /// Monotone version stamp for the next payload.
    pub fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue a broadcast of `payload` to every currently-healthy follower.
    /// Each follower is handled by its own detached task so one slow node
    /// never delays the rest.
    pub fn enqueue(&self, payload: SyncPayload) {
        for follower in self.nodes.healthy_nodes() {
            let client = self.client.clone();
            let token = self.token.clone();
            let nodes = Arc::clone(&self.nodes);
            let payload = payload.clone();
            tokio::spawn(async move {
                send_with_retries(
                    client,
                    token,
                    nodes,
                    follower.node_id,
                    follower.node_addr,
                    payload,
                )
                .await;
            });
        }
    }
}

async fn send_with_retries(
    client: reqwest::Client,
    token: String,
    nodes: Arc<NodeTable>,
    node_id: String,
    node_addr: String,
    payload: SyncPayload,
) {
    let url = format!("{}/api/component/sync", node_addr.trim_end_matches('/'));
    let mut last_error = String::new();
    for attempt in 1..=SYNC_RETRIES {
        match send_once(&client, &token, &url, &payload).await {
            Ok(()) => {
                nodes.record_sync_success(&node_id);
                tracing::debug!(
                    domain = "clu",
                    node = %node_id,
                    kind = %payload.kind,
                    id = %payload.id,
                    version = payload.version,
                    "sync delivered"
                );
                return;
            }
            Err(e) => {
                last_error = e.to_string();
                tracing::debug!(
                    domain = "clu",
                    node = %node_id,
                    attempt,
                    error = %last_error,
                    "sync attempt failed"
                );
                if attempt < SYNC_RETRIES {
                    tokio::time::sleep(SYNC_BACKOFF_STEP * attempt).await;
                }
            }
        }
    }
    tracing::warn!(
        domain = "clu",
        node = %node_id,
        kind = %payload.kind,
        id = %payload.id,
        version = payload.version,
        error = %last_error,
        "sync failed past retry budget"
    );
    nodes.record_sync_failure(&node_id, &last_error);
}

async fn send_once(
    client: &reqwest::Client,
    token: &str,
    url: &str,
    payload: &SyncPayload,
) -> ClusterResult<()> {
    let response = client
        .post(url)
        .bearer_auth(token)
        .json(payload)
        .send()
        .await
        .map_err(|e| StructError::from(ClusterReason::Http).with_detail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(StructError::from(ClusterReason::Sync)
            .with_detail(format!("follower returned {}", response.status())));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_roundtrip() {
        let up = SyncPayload::upsert(ComponentKind::Ruleset, "r1", "<root/>", None, 4);
        assert_eq!(up.kind, "ruleset");
        assert_eq!(up.parse_kind().unwrap(), (ComponentKind::Ruleset, false));

        let del = SyncPayload::delete(ComponentKind::Output, "o", 5);
        assert_eq!(del.kind, "output_delete");
        assert_eq!(del.parse_kind().unwrap(), (ComponentKind::Output, true));
    }

    #[test]
    fn bad_kind_is_rejected() {
        let payload = SyncPayload {
            kind: "gadget".into(),
            id: "x".into(),
            raw: None,
            is_running: None,
            version: 1,
        };
        assert!(payload.parse_kind().is_err());
    }

    #[test]
    fn project_payload_carries_run_state() {
        let up = SyncPayload::upsert(ComponentKind::Project, "p", "content: |\n", Some(true), 9);
        let json = serde_json::to_value(&up).unwrap();
        assert_eq!(json["is_running"], serde_json::json!(true));
        assert_eq!(json["type"], serde_json::json!("project"));
    }

    #[test]
    fn seen_versions_gate_replays() {
        let seen = SeenVersions::new();
        let v4 = SyncPayload::upsert(ComponentKind::Ruleset, "r1", "a", None, 4);
        assert!(seen.fresh(&v4));
        // Redelivery of the same version is dropped.
        assert!(!seen.fresh(&v4));
        // Older versions are dropped too.
        let v3 = SyncPayload::upsert(ComponentKind::Ruleset, "r1", "b", None, 3);
        assert!(!seen.fresh(&v3));
        // Newer versions pass; other ids are independent.
        let v5 = SyncPayload::upsert(ComponentKind::Ruleset, "r1", "c", None, 5);
        assert!(seen.fresh(&v5));
        let other = SyncPayload::upsert(ComponentKind::Ruleset, "r2", "d", None, 1);
        assert!(seen.fresh(&other));
    }

    #[test]
    fn versions_are_monotone() {
        let nodes = Arc::new(NodeTable::new(Duration::from_secs(15)));
        let broadcaster = SyncBroadcaster::new("t", nodes);
        let a = broadcaster.next_version();
        let b = broadcaster.next_version();
        assert!(b > a);
    }
}
