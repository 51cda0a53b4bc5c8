use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/services/{service_id}/releases", get(list))
        .route("/v1/releases/{id}", get(get_one))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    20
}

async fn list(State(state): State<AppState>, _ctx: AuthContext, Path(service_id): Path<Uuid>, Query(q): Query<ListQuery>) -> ApiResult<Json<Vec<crate::db::models::Release>>> {
    let releases = crate::db::releases::list_for_service(&state.db_pool, service_id, q.limit.clamp(1, 200)).await?;
    Ok(Json(releases))
}

async fn get_one(State(state): State<AppState>, _ctx: AuthContext, Path(id): Path<Uuid>) -> ApiResult<Json<crate::db::models::Release>> {
    let release = crate::db::releases::find_by_id(&state.db_pool, id).await?.ok_or_else(|| crate::error::ApiError::not_found("release not found"))?;
    Ok(Json(release))
}
