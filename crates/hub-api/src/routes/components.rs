use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use hub_config::ComponentKind;
use hub_core::registry::Registry;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

use super::parse_kind;

#[derive(Deserialize)]
pub struct CreateBody {
    pub id: String,
    #[serde(default)]
    pub raw: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateBody {
    pub raw: String,
}

#[derive(Deserialize)]
pub struct VerifyBody {
    pub raw: String,
}

#[derive(Deserialize)]
pub struct ApplySingleBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

// ---------------------------------------------------------------------------
// Listing and detail
// ---------------------------------------------------------------------------

/// `GET /{kind}` — all ids, with the pending marker.
pub async fn list(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(json!(state.hub.registry.list(kind))))
}

/// `GET /{kind}/{id}` — pending version if present, else formal. Projects
/// additionally carry run status and last error.
pub async fn detail(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    let rel_path = format!("{}/{}.{}", kind.dir(), id, kind.ext());

    if kind == ComponentKind::Project {
        let (raw, is_pending, status, last_error) = state
            .hub
            .project_detail(&id)
            .await
            .ok_or_else(|| ApiError::not_found(kind, &id))?;
        return Ok(Json(json!({
            "id": id,
            "raw": raw,
            "path": rel_path,
            "hasTemp": is_pending,
            "status": status,
            "error": last_error,
        })));
    }

    let (raw, is_pending) = state
        .hub
        .registry
        .get_raw(kind, &id)
        .ok_or_else(|| ApiError::not_found(kind, &id))?;
    Ok(Json(json!({
        "id": id,
        "raw": raw,
        "path": rel_path,
        "hasTemp": is_pending,
    })))
}

/// `GET /pending-changes`
pub async fn pending_changes(State(state): State<ApiState>) -> Json<Value> {
    Json(json!(state.hub.registry.pending_changes()))
}

// ---------------------------------------------------------------------------
// Pending workspace mutations
// ---------------------------------------------------------------------------

/// `POST /{kind}` — create a pending component from a template (or raw).
pub async fn create(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Json(body): Json<CreateBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let kind = parse_kind(&kind)?;
    if state.hub.registry.get_raw(kind, &body.id).is_some() {
        return Err(ApiError::conflict(format!(
            "{kind} {:?} already exists",
            body.id
        )));
    }
    state
        .hub
        .registry
        .create(kind, &body.id, body.raw)
        .map_err(ApiError::bad_request)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": body.id }))))
}

/// `PUT /{kind}/{id}` — stage an update; a no-op when equal to formal.
pub async fn update(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<UpdateBody>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    state
        .hub
        .registry
        .update(kind, &id, &body.raw)
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({ "id": id })))
}

/// `DELETE /{kind}/{id}` — 409 while referenced or running.
pub async fn remove(
    State(state): State<ApiState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    if state.hub.registry.get_raw(kind, &id).is_none() {
        return Err(ApiError::not_found(kind, &id));
    }
    let holders = state.hub.registry.projects_referencing(kind, &id);
    if !holders.is_empty() {
        return Err(ApiError::conflict(format!(
            "{kind} {id:?} is referenced by projects: {}",
            holders.join(", ")
        )));
    }
    if kind == ComponentKind::Project
        && state.hub.engine.project_status(&id).await
            == Some(hub_core::project::ProjectStatus::Running)
    {
        return Err(ApiError::conflict(format!(
            "project {id:?} is running; stop it first"
        )));
    }
    state
        .hub
        .delete(kind, &id)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({ "id": id })))
}

// ---------------------------------------------------------------------------
// Verify / apply
// ---------------------------------------------------------------------------

/// `POST /verify/{kind}/{id}` — pure dry-parse.
pub async fn verify(
    Path((kind, id)): Path<(String, String)>,
    Json(body): Json<VerifyBody>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(match Registry::verify(kind, &id, &body.raw) {
        Ok(()) => json!({ "valid": true }),
        Err(e) => json!({ "valid": false, "error": e.to_string() }),
    }))
}

/// `POST /apply-changes` — promote every pending change.
pub async fn apply_all(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let outcomes = state
        .hub
        .apply_all()
        .await
        .map_err(ApiError::bad_request)?;
    let applied: Vec<Value> = outcomes
        .iter()
        .map(|o| json!({ "type": o.kind, "id": o.id, "changed": o.changed }))
        .collect();
    Ok(Json(json!({ "applied": applied })))
}

/// `POST /apply-single-change` — promote one `(type, id)`.
pub async fn apply_single(
    State(state): State<ApiState>,
    Json(body): Json<ApplySingleBody>,
) -> ApiResult<Json<Value>> {
    let kind = parse_kind(&body.kind)?;
    let outcome = state
        .hub
        .apply_one(kind, &body.id)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({
        "type": outcome.kind,
        "id": outcome.id,
        "changed": outcome.changed,
        "affected_projects": outcome.affected_projects,
    })))
}
