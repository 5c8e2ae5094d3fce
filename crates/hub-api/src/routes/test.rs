use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};

use hub_core::record::Record;
use hub_runtime::hub::TEST_REPLAY_TIMEOUT;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

#[derive(Deserialize)]
pub struct RulesetTestBody {
    pub data: Value,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ProjectTestBody {
    pub input_node: String,
    pub data: Value,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct PluginTestBody {
    pub data: Value,
    #[serde(default)]
    pub content: Option<String>,
}

// ---------------------------------------------------------------------------
// Ruleset replay
// ---------------------------------------------------------------------------

/// `POST /test-ruleset` — replay a record through inline ruleset XML.
pub async fn ruleset_adhoc(
    State(state): State<ApiState>,
    Json(body): Json<RulesetTestBody>,
) -> ApiResult<Json<Value>> {
    run_ruleset(&state, None, body).await
}

/// `POST /test-ruleset/{id}` — replay through the stored (pending-shadowed)
/// ruleset.
pub async fn ruleset_by_id(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<RulesetTestBody>,
) -> ApiResult<Json<Value>> {
    run_ruleset(&state, Some(id), body).await
}

async fn run_ruleset(
    state: &ApiState,
    id: Option<String>,
    body: RulesetTestBody,
) -> ApiResult<Json<Value>> {
    let record = Record::from_value(body.data).map_err(ApiError::bad_request)?;
    let (results, is_temp) = state
        .hub
        .test_ruleset(id.as_deref(), body.content.as_deref(), record)
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({
        "success": true,
        "results": results,
        "isTemp": is_temp,
        "timeout": TEST_REPLAY_TIMEOUT.as_millis() as u64,
    })))
}

// ---------------------------------------------------------------------------
// Project replay
// ---------------------------------------------------------------------------

/// `POST /test-project` — replay through an inline project body.
pub async fn project_adhoc(
    State(state): State<ApiState>,
    Json(body): Json<ProjectTestBody>,
) -> ApiResult<Json<Value>> {
    run_project(&state, None, body).await
}

/// `POST /test-project/{id}` — replay through the stored project DAG.
pub async fn project_by_id(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<ProjectTestBody>,
) -> ApiResult<Json<Value>> {
    run_project(&state, Some(id), body).await
}

async fn run_project(
    state: &ApiState,
    id: Option<String>,
    body: ProjectTestBody,
) -> ApiResult<Json<Value>> {
    let record = Record::from_value(body.data).map_err(ApiError::bad_request)?;
    let (results, is_temp) = state
        .hub
        .test_project(
            id.as_deref(),
            body.content.as_deref(),
            &body.input_node,
            record,
        )
        .await
        .map_err(ApiError::bad_request)?;

    let mut outputs = serde_json::Map::new();
    let mut total = 0usize;
    for (pns, records) in results {
        total += records.len();
        outputs.insert(pns.to_string(), json!(records));
    }
    let mut response = json!({
        "success": true,
        "outputs": outputs,
        "isTemp": is_temp,
        "timeout": TEST_REPLAY_TIMEOUT.as_millis() as u64,
    });
    if total == 0 {
        response["warning"] = json!("no output produced within the replay window");
    }
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Plugin execution
// ---------------------------------------------------------------------------

/// `POST /test-plugin` — execute inline plugin source in a detached registry.
pub async fn plugin_adhoc(
    State(state): State<ApiState>,
    Json(body): Json<PluginTestBody>,
) -> ApiResult<Json<Value>> {
    run_plugin(&state, None, body).await
}

/// `POST /test-plugin/{id}` — execute the stored plugin.
pub async fn plugin_by_id(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<PluginTestBody>,
) -> ApiResult<Json<Value>> {
    run_plugin(&state, Some(id), body).await
}

async fn run_plugin(
    state: &ApiState,
    id: Option<String>,
    body: PluginTestBody,
) -> ApiResult<Json<Value>> {
    let args = match body.data {
        Value::Array(items) => items,
        other => vec![other],
    };
    let (result, is_temp) = state
        .hub
        .test_plugin(id.as_deref(), body.content.as_deref(), args)
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({
        "success": true,
        "result": result,
        "isTemp": is_temp,
    })))
}
