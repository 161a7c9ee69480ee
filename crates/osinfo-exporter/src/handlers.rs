//! HTTP request handlers: landing page, exposition, health, collector status.

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;
use tower_http::compression::CompressionLayer;

use osinfo_core::registry::CONTENT_TYPE;
use osinfo_core::scheduler::ProbeStatsSnapshot;

use crate::state::AppState;

const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>System OS info Exporter</title></head>
<body>
<h1>System OS info Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/api/v1/collectors">Collectors</a></p>
</body>
</html>
"#;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .route("/api/v1/collectors", get(handle_collectors))
        .with_state(state)
        .layer(CompressionLayer::new())
}

pub(crate) async fn handle_index() -> Html<&'static str> {
    Html(LANDING_PAGE)
}

pub(crate) async fn handle_health() -> &'static str {
    "ok"
}

/// Renders every family plus collector self-metrics. Each family is read
/// under its own lock, so a scrape never waits on a probe that is writing
/// a different family.
pub(crate) async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.scheduler.render();
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

#[derive(Serialize)]
pub(crate) struct CollectorsResponse {
    version: &'static str,
    platform: String,
    collectors: Vec<ProbeStatsSnapshot>,
}

pub(crate) async fn handle_collectors(State(state): State<AppState>) -> Json<CollectorsResponse> {
    Json(CollectorsResponse {
        version: osinfo_core::VERSION,
        platform: state.platform.to_string(),
        collectors: state.scheduler.stats(),
    })
}
