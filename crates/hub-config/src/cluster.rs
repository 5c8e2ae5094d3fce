use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Follower-side cluster settings. Leaders ignore this section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Base URL of the leader's control API, e.g. `"http://10.0.0.1:8900"`.
    pub leader_addr: String,
    /// Heartbeat send interval.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: HumanDuration,
    /// A follower is marked unhealthy by the leader after this many missed
    /// heartbeats.
    #[serde(default = "default_miss_threshold")]
    pub miss_threshold: u32,
}

fn default_heartbeat_interval() -> HumanDuration {
    "5s".parse().expect("static default")
}

fn default_miss_threshold() -> u32 {
    3
}
