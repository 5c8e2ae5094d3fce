use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use hub_config::ClusterConfig;
use hub_core::metrics::StatSample;

use std::time::Duration;

/// Follower metrics push cadence.
const METRICS_PUSH_INTERVAL: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: String,
    pub node_addr: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSample {
    pub cpu_percent: f32,
    pub mem_used: u64,
    pub mem_total: u64,
}

/// Follower→leader metrics push: total input QPS, host resources, and the
/// daily-stat buckets accumulated since the last push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub node_id: String,
    pub node_addr: String,
    pub qps_total: u64,
    pub system: SystemSample,
    pub daily: Vec<StatSample>,
}

pub fn system_sample(sys: &mut sysinfo::System) -> SystemSample {
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    SystemSample {
        cpu_percent: sys.global_cpu_usage(),
        mem_used: sys.used_memory(),
        mem_total: sys.total_memory(),
    }
}

// ---------------------------------------------------------------------------
// Follower loops
// ---------------------------------------------------------------------------

/// Send a heartbeat to the leader every `heartbeat_interval` until cancelled.
/// Send failures are logged and retried on the next tick; the leader marks
/// this node unhealthy after enough silence.
pub async fn run_heartbeat(
    config: ClusterConfig,
    node_id: String,
    node_addr: String,
    token: String,
    cancel: CancellationToken,
) {
    let client = reqwest::Client::new();
    let url = format!(
        "{}/api/cluster/heartbeat",
        config.leader_addr.trim_end_matches('/')
    );
    let mut tick = tokio::time::interval(config.heartbeat_interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let beat = Heartbeat {
                    node_id: node_id.clone(),
                    node_addr: node_addr.clone(),
                    timestamp: chrono::Utc::now().timestamp(),
                };
                let result = client
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&beat)
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().is_success() => {
                        tracing::trace!(domain = "clu", "heartbeat acknowledged");
                    }
                    Ok(response) => {
                        tracing::warn!(
                            domain = "clu",
                            status = %response.status(),
                            "leader rejected heartbeat"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(domain = "clu", error = %e, "heartbeat send failed");
                    }
                }
            }
        }
    }
}

/// Post QPS and system-resource samples to the leader every 10 seconds.
/// `report_fn` is supplied by the runtime, which owns the live shells.
pub async fn run_metrics_push<F, Fut>(
    config: ClusterConfig,
    token: String,
    report_fn: F,
    cancel: CancellationToken,
) where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = MetricsReport>,
{
    let client = reqwest::Client::new();
    let url = format!(
        "{}/api/cluster/metrics",
        config.leader_addr.trim_end_matches('/')
    );
    let mut tick = tokio::time::interval(METRICS_PUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let report = report_fn().await;
                if let Err(e) = client
                    .post(&url)
                    .bearer_auth(&token)
                    .json(&report)
                    .send()
                    .await
                {
                    tracing::debug!(domain = "clu", error = %e, "metrics push failed");
                }
            }
        }
    }
}
