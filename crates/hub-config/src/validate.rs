use std::net::SocketAddr;

use crate::node::NodeConfig;

/// Cross-field validation for a parsed [`NodeConfig`].
pub fn validate(config: &NodeConfig) -> anyhow::Result<()> {
    if config.node.id.trim().is_empty() {
        anyhow::bail!("[node] id must not be empty");
    }

    config
        .server
        .listen
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("[server] listen {:?}: {e}", config.server.listen))?;

    if config.server.token.is_empty() {
        anyhow::bail!("[server] token must not be empty");
    }

    if config.limits.channel_capacity == 0 {
        anyhow::bail!("[limits] channel_capacity must be > 0");
    }
    if config.limits.stop_timeout.as_duration().is_zero() {
        anyhow::bail!("[limits] stop_timeout must be > 0");
    }

    match (&config.node.role, &config.cluster) {
        (crate::NodeRole::Follower, None) => {
            anyhow::bail!("follower nodes require a [cluster] section with leader_addr");
        }
        (crate::NodeRole::Follower, Some(cluster)) => {
            if cluster.leader_addr.trim().is_empty() {
                anyhow::bail!("[cluster] leader_addr must not be empty");
            }
            if cluster.heartbeat_interval.as_duration().is_zero() {
                anyhow::bail!("[cluster] heartbeat_interval must be > 0");
            }
            if cluster.miss_threshold == 0 {
                anyhow::bail!("[cluster] miss_threshold must be > 0");
            }
        }
        (crate::NodeRole::Leader, _) => {}
    }

    Ok(())
}
