use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Point-in-time snapshot across every subsystem.
pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let frame = state.telemetry.snapshot().await;
    let (render_hits, render_misses, render_entries) = state.engine.cache_stats();

    Json(json!({
        "timestamp": frame.timestamp,
        "pools": frame.pools,
        "system": frame.system,
        "detector": state.detector.stats(),
        "site_cache": state.site_cache.stats(),
        "html_cache": state.html_cache.stats(),
        "template_cache": {
            "hits": render_hits,
            "misses": render_misses,
            "entries": render_entries,
        },
        "page_timings": state.timings.snapshot(),
        "producers": {
            "title_underflows": state.producers.title_underflows.load(Ordering::Relaxed),
            "content_exhausted": state.producers.content_exhausted.load(Ordering::Relaxed),
        },
    }))
}

/// Windowed history of 1 Hz telemetry frames.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(60).min(300);
    Json(json!({ "frames": state.telemetry.history(limit) }))
}
