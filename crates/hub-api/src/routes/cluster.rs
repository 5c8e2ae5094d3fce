use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use hub_cluster::{ClusterStatus, Heartbeat, MetricsReport, SyncPayload};

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

/// `POST /cluster/heartbeat` — follower→leader liveness; auto-registers new
/// followers.
pub async fn heartbeat(
    State(state): State<ApiState>,
    Json(beat): Json<Heartbeat>,
) -> Json<Value> {
    state
        .hub
        .nodes
        .observe_heartbeat(&beat.node_id, &beat.node_addr);
    Json(json!({ "ok": true }))
}

/// `GET /cluster/status` — node table with health and last sync errors.
pub async fn status(State(state): State<ApiState>) -> Json<ClusterStatus> {
    Json(ClusterStatus::from_table(
        state.hub.role_name(),
        state.hub.node_id(),
        &state.hub.nodes,
    ))
}

/// `POST /cluster/metrics` — follower QPS/system sample plus daily-stat
/// deltas, folded into the leader's aggregate view.
pub async fn metrics_push(
    State(state): State<ApiState>,
    Json(report): Json<MetricsReport>,
) -> Json<Value> {
    state.hub.nodes.observe_heartbeat(&report.node_id, &report.node_addr);
    state.hub.nodes.record_metrics(
        &report.node_id,
        json!({ "qps_total": report.qps_total, "system": report.system }),
    );
    state.hub.daily.merge(&report.daily);
    Json(json!({ "ok": true }))
}

/// `POST /component/sync` — leader→follower configuration delta.
pub async fn component_sync(
    State(state): State<ApiState>,
    Json(payload): Json<SyncPayload>,
) -> ApiResult<Json<Value>> {
    state
        .hub
        .handle_sync(payload)
        .await
        .map_err(ApiError::bad_request)?;
    Ok(Json(json!({ "ok": true })))
}
