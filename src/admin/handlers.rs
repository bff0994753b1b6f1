use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheBackendError, CacheStats};
use crate::error::FetchError;
use crate::http::AppState;
use crate::resilience::BreakerStatus;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub services: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub pattern: String,
    pub removed: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        services: state.ctx.upstreams.service_names().map(str::to_string).collect(),
    })
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<BreakerStatus>, FetchError> {
    let upstream = state
        .ctx
        .upstreams
        .get(&service)
        .ok_or_else(|| FetchError::UnknownService(service.clone()))?;
    upstream.breaker().reset();
    Ok(Json(upstream.breaker().status()))
}

pub async fn trip_breaker(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<BreakerStatus>, FetchError> {
    let upstream = state
        .ctx
        .upstreams
        .get(&service)
        .ok_or_else(|| FetchError::UnknownService(service.clone()))?;
    upstream.breaker().trip();
    Ok(Json(upstream.breaker().status()))
}

pub async fn get_cache(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.ctx.cache.stats())
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, CacheBackendError> {
    let removed = state.ctx.cache.clear_pattern(&request.pattern).await?;
    Ok(Json(InvalidateResponse {
        pattern: request.pattern,
        removed,
    }))
}
