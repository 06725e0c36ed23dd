use crate::handlers::{alerts, health, metrics, page, ws};
use crate::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// The closed HTTP surface the core exposes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/page", get(page::page))
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::metrics))
        .route("/metrics/history", get(metrics::history))
        .route("/alerts", get(alerts::alerts))
        .route("/ws/pool-status", get(ws::pool_status))
        .route("/ws/system-stats", get(ws::system_stats))
        .route("/ws/spider-stats/:id", get(ws::spider_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .with_state(state)
}
