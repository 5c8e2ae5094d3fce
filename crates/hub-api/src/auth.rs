use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;

use crate::error::ApiError;
use crate::state::ApiState;

/// Bearer auth for mutating endpoints: either the shared node token, or —
/// when OIDC is configured — an HS256 ID token with matching issuer,
/// audience, and (if restricted) an allow-listed username claim.
pub async fn require_auth(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    if token == state.hub.token() {
        return Ok(next.run(request).await);
    }

    let Some(oidc) = state.hub.oidc() else {
        return Err(ApiError::Unauthorized("invalid token".into()));
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[oidc.issuer.as_str()]);
    validation.set_audience(&[oidc.client_id.as_str()]);
    let decoded = jsonwebtoken::decode::<Value>(
        token,
        &DecodingKey::from_secret(oidc.shared_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| ApiError::Unauthorized(format!("token rejected: {e}")))?;

    if !oidc.allowed_users.is_empty() {
        let user = decoded
            .claims
            .get(&oidc.username_claim)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ApiError::Unauthorized(format!("missing {:?} claim", oidc.username_claim))
            })?;
        if !oidc.allowed_users.iter().any(|u| u == user) {
            return Err(ApiError::Unauthorized(format!(
                "user {user:?} is not allowed"
            )));
        }
    }

    Ok(next.run(request).await)
}
