use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::report::HealthReport;
use crate::http::AppState;

pub async fn liveness() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// 200 when no breaker is OPEN and no queue is under pressure, else 503.
pub async fn detailed_health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = HealthReport::collect(&state.ctx);
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        tracing::warn!(open_breakers = ?report.open_breakers, "Health check degraded");
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
