use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};

use hub_core::project::ProjectStatus;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

#[derive(Deserialize)]
pub struct LifecycleBody {
    pub project_id: String,
}

/// `POST /project/start` — 409 when already running.
pub async fn start(
    State(state): State<ApiState>,
    Json(body): Json<LifecycleBody>,
) -> ApiResult<Json<Value>> {
    let id = &body.project_id;
    if state.hub.registry.project(id).is_none() {
        return Err(ApiError::not_found("project", id));
    }
    if state.hub.engine.project_status(id).await == Some(ProjectStatus::Running) {
        return Err(ApiError::conflict(format!("project {id:?} is already running")));
    }
    state
        .hub
        .start_project(id)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({ "project_id": id, "status": ProjectStatus::Running })))
}

/// `POST /project/stop` — idempotent.
pub async fn stop(
    State(state): State<ApiState>,
    Json(body): Json<LifecycleBody>,
) -> ApiResult<Json<Value>> {
    let id = &body.project_id;
    if state.hub.registry.project(id).is_none() {
        return Err(ApiError::not_found("project", id));
    }
    state
        .hub
        .stop_project(id)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({ "project_id": id, "status": ProjectStatus::Stopped })))
}
