mod input;
mod output;

#[cfg(test)]
mod tests;

pub use input::{IdleSource, InputShell, RecordSource, source_for};
pub use output::{OutputShell, PrintSink, RecordSink, sink_for};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Connectivity reporting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Live with nonzero recent QPS.
    Active,
    /// Historical traffic only.
    Idle,
    /// Driver is live but no records yet.
    Connected,
    NotConfigured,
    Unsupported,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnError {
    pub message: String,
    pub severity: String,
}

/// Result of a driver `CheckConnectivity` probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityReport {
    pub status: ConnStatus,
    pub client_type: String,
    pub connection_status: ConnectionState,
    pub connection_info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
    #[serde(rename = "connection_errors")]
    pub errors: Vec<ConnError>,
}

impl ConnectivityReport {
    /// Shared shape: traffic-based state resolution over driver metrics.
    pub(crate) fn from_traffic(
        client_type: &str,
        connection_info: String,
        total: u64,
        active: bool,
        wired: bool,
    ) -> Self {
        let (status, connection_status, errors) = if active {
            (ConnStatus::Ok, ConnectionState::Active, Vec::new())
        } else if total > 0 {
            (ConnStatus::Ok, ConnectionState::Idle, Vec::new())
        } else if wired {
            (ConnStatus::Ok, ConnectionState::Connected, Vec::new())
        } else {
            (
                ConnStatus::Warning,
                ConnectionState::NotConfigured,
                vec![ConnError {
                    message: format!("{client_type} transport is not linked into this build"),
                    severity: "warning".to_string(),
                }],
            )
        };
        Self {
            status,
            client_type: client_type.to_string(),
            connection_status,
            connection_info,
            metrics: Some(serde_json::json!({ "total_messages": total })),
            errors,
        }
    }
}
