use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
}

/// Liveness never touches a dependency — it answers "is the process
/// scheduled and responsive", not "is the stack healthy".
async fn live() -> &'static str {
    "ok"
}

/// Readiness checks the two dependencies every request needs: the database
/// pool and the cache connection. Either failing takes this instance out of
/// the load balancer without killing the process.
async fn ready(State(state): State<AppState>) -> (axum::http::StatusCode, Json<serde_json::Value>) {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db_pool).await.is_ok();
    let cache_ok = state.cache.ping().await.is_ok();

    let status = if db_ok && cache_ok { axum::http::StatusCode::OK } else { axum::http::StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({ "database": db_ok, "cache": cache_ok })))
}

async fn metrics() -> Result<String, crate::error::ApiError> {
    crate::metrics::render().map_err(crate::error::ApiError::internal_anyhow)
}
