use crate::state::AppState;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<usize>,
    pub unresolved: Option<bool>,
}

/// Ongoing and resolved alerts, newest first.
pub async fn alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(50).min(500);
    let unresolved_only = query.unresolved.unwrap_or(false);
    Json(json!({
        "alerts": state.alerts.list(limit, unresolved_only),
        "unresolved": state.alerts.unresolved_count(),
    }))
}
