use std::collections::HashMap;

use axum::Json;
use axum::extract::{Query, State};
use chrono::NaiveDate;
use serde_json::{Value, json};

use hub_core::metrics::StatsFilter;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

/// `GET /plugin-stats?date=YYYY-MM-DD&node_id=...` — daily success/failure
/// counts per plugin, aggregated across nodes unless one is named.
pub async fn plugin_stats(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let date = match params.get("date") {
        Some(raw) => Some(
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| ApiError::bad_request(format!("bad date {raw:?}: {e}")))?,
        ),
        None => None,
    };
    let filter = StatsFilter {
        date,
        node_id: params.get("node_id").cloned(),
        sequence_prefix: Some("PLUGIN.".to_string()),
        ..Default::default()
    };

    let samples = state.hub.daily.query(&filter);
    let stats: Vec<Value> = samples
        .iter()
        .filter_map(|sample| {
            // sequence = PLUGIN.<name>.<success|failure>
            let mut parts = sample.key.sequence.splitn(3, '.');
            let _ = parts.next()?;
            let plugin = parts.next()?;
            let status = parts.next()?;
            Some(json!({
                "date": sample.key.date,
                "hour": sample.key.hour,
                "node_id": sample.key.node_id,
                "plugin": plugin,
                "status": status,
                "count": sample.count,
            }))
        })
        .collect();
    Ok(Json(json!({ "stats": stats })))
}
