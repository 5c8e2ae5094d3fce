use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

use super::parse_kind;

#[derive(Deserialize)]
pub struct CheckBody {
    pub raw: String,
}

/// `GET /connect-check/{kind}/{id}` — probe the stored (or live) driver.
pub async fn check_stored(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    run_check(&state, &kind, &id, None).await
}

/// `POST /connect-check/{kind}/{id}` — probe an edited configuration.
pub async fn check_raw(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<CheckBody>,
) -> ApiResult<Json<Value>> {
    run_check(&state, &kind, &id, Some(body.raw)).await
}

async fn run_check(
    state: &ApiState,
    kind: &str,
    id: &str,
    raw: Option<String>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(kind)?;
    let (report, is_temp) = state
        .hub
        .connect_check(kind, id, raw.as_deref())
        .await
        .map_err(ApiError::bad_request)?;
    let message = format!(
        "{} {} is {:?}",
        report.client_type,
        id,
        report.connection_status
    )
    .to_lowercase();
    Ok(Json(json!({
        "status": report.status,
        "message": message,
        "isTemp": is_temp,
        "details": report,
    })))
}
