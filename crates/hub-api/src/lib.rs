mod auth;
mod error;
mod routes;
mod state;

pub use state::ApiState;

use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post, put};

/// Assemble the control API under `/api`.
///
/// Reads are open; every mutating endpoint (plus the config snapshot, which
/// contains credentials) requires the shared bearer token or a verified OIDC
/// identity.
pub fn router(state: ApiState) -> Router {
    let open = Router::new()
        .route("/pending-changes", get(routes::components::pending_changes))
        .route("/cluster/status", get(routes::cluster::status))
        .route("/plugin-stats", get(routes::stats::plugin_stats))
        .route(
            "/connect-check/:kind/:id",
            get(routes::connect::check_stored),
        )
        .route("/:kind", get(routes::components::list))
        .route("/:kind/:id", get(routes::components::detail));

    let protected = Router::new()
        .route("/:kind", post(routes::components::create))
        .route("/:kind/:id", put(routes::components::update))
        .route("/:kind/:id", delete(routes::components::remove))
        .route("/verify/:kind/:id", post(routes::components::verify))
        .route("/apply-changes", post(routes::components::apply_all))
        .route(
            "/apply-single-change",
            post(routes::components::apply_single),
        )
        .route("/project/start", post(routes::projects::start))
        .route("/project/stop", post(routes::projects::stop))
        .route(
            "/connect-check/:kind/:id",
            post(routes::connect::check_raw),
        )
        .route("/test-ruleset", post(routes::test::ruleset_adhoc))
        .route("/test-ruleset/:id", post(routes::test::ruleset_by_id))
        .route("/test-project", post(routes::test::project_adhoc))
        .route("/test-project/:id", post(routes::test::project_by_id))
        .route("/test-plugin", post(routes::test::plugin_adhoc))
        .route("/test-plugin/:id", post(routes::test::plugin_by_id))
        .route("/cluster/heartbeat", post(routes::cluster::heartbeat))
        .route("/cluster/metrics", post(routes::cluster::metrics_push))
        .route("/component/sync", post(routes::cluster::component_sync))
        .route("/config/download", get(routes::download::config_download))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .nest("/api", open.merge(protected))
        .with_state(state)
}
