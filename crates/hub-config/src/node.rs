use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::auth::OidcConfig;
use crate::cluster::ClusterConfig;
use crate::limits::LimitsConfig;
use crate::logging::LoggingConfig;
use crate::server::ServerConfig;
use crate::validate;

// ---------------------------------------------------------------------------
// Raw TOML structure (intermediate representation)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NodeConfigRaw {
    node: NodeSection,
    server: ServerConfig,
    #[serde(default)]
    cluster: Option<ClusterConfig>,
    #[serde(default)]
    auth: AuthSection,
    #[serde(default)]
    limits: LimitsConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
struct AuthSection {
    #[serde(default)]
    oidc: Option<OidcConfig>,
}

/// The `[node]` section: identity, role and artifact root.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    pub id: String,
    pub role: NodeRole,
    /// Root of the on-disk artifact tree (per-kind subdirectories). Relative
    /// paths are resolved against the config file's parent directory.
    pub data_dir: PathBuf,
}

/// Statically-assigned cluster role. There is no election; a single leader
/// owns the authoritative configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Leader,
    Follower,
}

impl NodeRole {
    pub fn is_leader(&self) -> bool {
        matches!(self, NodeRole::Leader)
    }
}

// ---------------------------------------------------------------------------
// NodeConfig (resolved, validated)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub server: ServerConfig,
    /// Present and required on followers; ignored on the leader.
    pub cluster: Option<ClusterConfig>,
    pub oidc: Option<OidcConfig>,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Read and parse a `hub.toml` file, resolving `data_dir` against the
    /// file's parent directory.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config: Self = content.parse()?;
        if config.node.data_dir.is_relative()
            && let Some(parent) = path.parent()
        {
            config.node.data_dir = parent.join(&config.node.data_dir);
        }
        Ok(config)
    }
}

impl FromStr for NodeConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a resolved, validated [`NodeConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let raw: NodeConfigRaw = toml::from_str(toml_str)?;

        let config = NodeConfig {
            node: raw.node,
            server: raw.server,
            cluster: raw.cluster,
            oidc: raw.auth.oidc,
            limits: raw.limits,
            logging: raw.logging,
        };

        validate::validate(&config)?;

        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const LEADER_TOML: &str = r#"
[node]
id = "leader-1"
role = "leader"
data_dir = "config"

[server]
listen = "127.0.0.1:8900"
token = "secret"

[limits]
channel_capacity = 512
stop_timeout = "5s"
"#;

    const FOLLOWER_TOML: &str = r#"
[node]
id = "worker-7"
role = "follower"
data_dir = "config"

[server]
listen = "0.0.0.0:8900"
token = "secret"

[cluster]
leader_addr = "http://10.0.0.1:8900"
heartbeat_interval = "2s"
"#;

    #[test]
    fn load_leader_toml() {
        let cfg: NodeConfig = LEADER_TOML.parse().unwrap();
        assert_eq!(cfg.node.id, "leader-1");
        assert!(cfg.node.role.is_leader());
        assert_eq!(cfg.server.listen, "127.0.0.1:8900");
        assert_eq!(cfg.limits.channel_capacity, 512);
        assert_eq!(
            cfg.limits.stop_timeout.as_duration(),
            Duration::from_secs(5)
        );
        // defaults
        assert_eq!(cfg.limits.output_retries, 3);
        assert!(cfg.cluster.is_none());
        assert!(cfg.oidc.is_none());
    }

    #[test]
    fn load_follower_toml() {
        let cfg: NodeConfig = FOLLOWER_TOML.parse().unwrap();
        assert!(!cfg.node.role.is_leader());
        let cluster = cfg.cluster.expect("follower must carry [cluster]");
        assert_eq!(cluster.leader_addr, "http://10.0.0.1:8900");
        assert_eq!(
            cluster.heartbeat_interval.as_duration(),
            Duration::from_secs(2)
        );
        assert_eq!(cluster.miss_threshold, 3);
    }

    #[test]
    fn reject_follower_without_cluster() {
        let toml = FOLLOWER_TOML.replace("[cluster]", "[cluster_off]");
        assert!(toml.parse::<NodeConfig>().is_err());
    }

    #[test]
    fn reject_invalid_listen() {
        let toml = LEADER_TOML.replace("127.0.0.1:8900", "not-an-addr");
        assert!(toml.parse::<NodeConfig>().is_err());
    }

    #[test]
    fn reject_zero_capacity() {
        let toml = LEADER_TOML.replace("channel_capacity = 512", "channel_capacity = 0");
        assert!(toml.parse::<NodeConfig>().is_err());
    }

    #[test]
    fn reject_empty_token() {
        let toml = LEADER_TOML.replace("token = \"secret\"", "token = \"\"");
        assert!(toml.parse::<NodeConfig>().is_err());
    }

    #[test]
    fn missing_server_fails() {
        let toml = r#"
[node]
id = "x"
role = "leader"
data_dir = "config"
"#;
        assert!(toml.parse::<NodeConfig>().is_err());
    }
}
