use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ComponentKind
// ---------------------------------------------------------------------------

/// The five artifact kinds managed by the registry and the artifact store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Input,
    Output,
    Ruleset,
    Project,
    Plugin,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::Input,
        ComponentKind::Output,
        ComponentKind::Ruleset,
        ComponentKind::Project,
        ComponentKind::Plugin,
    ];

    /// Subdirectory name under the artifact root.
    pub fn dir(&self) -> &'static str {
        match self {
            ComponentKind::Input => "input",
            ComponentKind::Output => "output",
            ComponentKind::Ruleset => "ruleset",
            ComponentKind::Project => "project",
            ComponentKind::Plugin => "plugin",
        }
    }

    /// On-disk extension for formal artifacts (pending adds `.new`).
    pub fn ext(&self) -> &'static str {
        match self {
            ComponentKind::Ruleset => "xml",
            ComponentKind::Plugin => "pl",
            _ => "yaml",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

impl FromStr for ComponentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "input" => Ok(ComponentKind::Input),
            "output" => Ok(ComponentKind::Output),
            "ruleset" => Ok(ComponentKind::Ruleset),
            "project" => Ok(ComponentKind::Project),
            "plugin" => Ok(ComponentKind::Plugin),
            other => anyhow::bail!("unknown component kind {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Input configurations (YAML, discriminated by `type`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputConfig {
    Kafka {
        brokers: Vec<String>,
        topic: String,
        #[serde(default = "default_group")]
        group: String,
    },
    AliyunSls {
        endpoint: String,
        project: String,
        logstore: String,
        access_key_id: String,
        access_key_secret: String,
        #[serde(default = "default_group")]
        consumer_group: String,
    },
}

fn default_group() -> String {
    "hub-consumers".to_string()
}

impl InputConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn client_type(&self) -> &'static str {
        match self {
            InputConfig::Kafka { .. } => "kafka",
            InputConfig::AliyunSls { .. } => "aliyun_sls",
        }
    }

    /// Human-readable endpoint summary for connectivity reports.
    pub fn connection_info(&self) -> String {
        match self {
            InputConfig::Kafka { brokers, topic, .. } => {
                format!("{} topic={topic}", brokers.join(","))
            }
            InputConfig::AliyunSls {
                endpoint,
                project,
                logstore,
                ..
            } => format!("{endpoint} project={project} logstore={logstore}"),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self {
            InputConfig::Kafka { brokers, topic, .. } => {
                if brokers.is_empty() {
                    anyhow::bail!("kafka input: brokers must not be empty");
                }
                if topic.is_empty() {
                    anyhow::bail!("kafka input: topic must not be empty");
                }
            }
            InputConfig::AliyunSls {
                endpoint,
                project,
                logstore,
                ..
            } => {
                if endpoint.is_empty() || project.is_empty() || logstore.is_empty() {
                    anyhow::bail!("aliyun_sls input: endpoint, project and logstore are required");
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output configurations (YAML, discriminated by `type`)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConfig {
    Kafka {
        brokers: Vec<String>,
        topic: String,
    },
    AliyunSls {
        endpoint: String,
        project: String,
        logstore: String,
        access_key_id: String,
        access_key_secret: String,
    },
    Elasticsearch {
        hosts: Vec<String>,
        index: String,
        #[serde(default)]
        auth: Option<EsAuth>,
    },
    Print,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EsAuth {
    pub username: String,
    pub password: String,
}

impl OutputConfig {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn client_type(&self) -> &'static str {
        match self {
            OutputConfig::Kafka { .. } => "kafka",
            OutputConfig::AliyunSls { .. } => "aliyun_sls",
            OutputConfig::Elasticsearch { .. } => "elasticsearch",
            OutputConfig::Print => "print",
        }
    }

    pub fn connection_info(&self) -> String {
        match self {
            OutputConfig::Kafka { brokers, topic } => {
                format!("{} topic={topic}", brokers.join(","))
            }
            OutputConfig::AliyunSls {
                endpoint,
                project,
                logstore,
                ..
            } => format!("{endpoint} project={project} logstore={logstore}"),
            OutputConfig::Elasticsearch { hosts, index, .. } => {
                format!("{} index={index}", hosts.join(","))
            }
            OutputConfig::Print => "console".to_string(),
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self {
            OutputConfig::Kafka { brokers, topic } => {
                if brokers.is_empty() {
                    anyhow::bail!("kafka output: brokers must not be empty");
                }
                if topic.is_empty() {
                    anyhow::bail!("kafka output: topic must not be empty");
                }
            }
            OutputConfig::AliyunSls {
                endpoint,
                project,
                logstore,
                ..
            } => {
                if endpoint.is_empty() || project.is_empty() || logstore.is_empty() {
                    anyhow::bail!("aliyun_sls output: endpoint, project and logstore are required");
                }
            }
            OutputConfig::Elasticsearch { hosts, index, .. } => {
                if hosts.is_empty() {
                    anyhow::bail!("elasticsearch output: hosts must not be empty");
                }
                if index.is_empty() {
                    anyhow::bail!("elasticsearch output: index must not be empty");
                }
            }
            OutputConfig::Print => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kafka_input() {
        let raw = r#"
type: kafka
brokers: ["k1:9092", "k2:9092"]
topic: security_events
"#;
        let cfg = InputConfig::parse(raw).unwrap();
        assert_eq!(cfg.client_type(), "kafka");
        match cfg {
            InputConfig::Kafka {
                brokers,
                topic,
                group,
            } => {
                assert_eq!(brokers.len(), 2);
                assert_eq!(topic, "security_events");
                assert_eq!(group, "hub-consumers");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parse_sls_input() {
        let raw = r#"
type: aliyun_sls
endpoint: cn-hangzhou.log.aliyuncs.com
project: sec
logstore: events
access_key_id: AK
access_key_secret: SK
"#;
        let cfg = InputConfig::parse(raw).unwrap();
        assert_eq!(cfg.client_type(), "aliyun_sls");
    }

    #[test]
    fn reject_kafka_without_brokers() {
        let raw = "type: kafka\nbrokers: []\ntopic: t\n";
        assert!(InputConfig::parse(raw).is_err());
    }

    #[test]
    fn reject_unknown_input_type() {
        let raw = "type: carrier_pigeon\n";
        assert!(InputConfig::parse(raw).is_err());
    }

    #[test]
    fn parse_print_output() {
        let cfg = OutputConfig::parse("type: print\n").unwrap();
        assert_eq!(cfg, OutputConfig::Print);
        assert_eq!(cfg.connection_info(), "console");
    }

    #[test]
    fn parse_elasticsearch_output() {
        let raw = r#"
type: elasticsearch
hosts: ["http://es1:9200"]
index: hub-alerts
auth:
  username: ops
  password: pw
"#;
        let cfg = OutputConfig::parse(raw).unwrap();
        assert_eq!(cfg.client_type(), "elasticsearch");
    }

    #[test]
    fn reject_elasticsearch_without_index() {
        let raw = "type: elasticsearch\nhosts: [\"http://es:9200\"]\nindex: \"\"\n";
        assert!(OutputConfig::parse(raw).is_err());
    }

    #[test]
    fn kind_roundtrip() {
        for kind in ComponentKind::ALL {
            let parsed: ComponentKind = kind.dir().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("widget".parse::<ComponentKind>().is_err());
    }
}
