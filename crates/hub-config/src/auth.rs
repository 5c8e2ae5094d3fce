use serde::{Deserialize, Serialize};

/// Optional OIDC bearer verification for the control API.
///
/// When present, a request may authenticate with an ID token instead of the
/// shared server token. The token signature is verified against
/// `shared_secret` (HS256); issuer and audience must match, and when
/// `allowed_users` is non-empty the `username_claim` value must be listed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    #[serde(default = "default_username_claim")]
    pub username_claim: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// HS256 verification key. Distinct from `[server] token` so operator
    /// SSO material rotates independently of intra-cluster auth.
    pub shared_secret: String,
}

fn default_username_claim() -> String {
    "preferred_username".to_string()
}
