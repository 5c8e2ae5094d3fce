use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address for the control API, e.g. `"127.0.0.1:8900"`.
    pub listen: String,
    /// Shared bearer token required on all mutating endpoints and on
    /// leader/follower traffic.
    pub token: String,
}
