pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use crate::http::AppState;
use self::handlers::*;
use self::auth::admin_auth_middleware;

/// Admin routes, all behind bearer authentication.
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers/{service}/reset", post(reset_breaker))
        .route("/admin/breakers/{service}/trip", post(trip_breaker))
        .route("/admin/cache", get(get_cache))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
