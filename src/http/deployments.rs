use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/services/{service_id}/deployments", get(list))
        .route("/v1/services/{service_id}/deploy", post(deploy))
        .route("/v1/deployments/{id}", get(get_one))
        .route("/v1/deployments/{id}/rollback", post(rollback))
}

async fn list(State(state): State<AppState>, _ctx: AuthContext, Path(service_id): Path<Uuid>) -> ApiResult<Json<Vec<crate::db::models::Deployment>>> {
    let deployments = crate::db::deployments::list_for_service(&state.db_pool, service_id).await?;
    Ok(Json(deployments))
}

async fn get_one(State(state): State<AppState>, _ctx: AuthContext, Path(id): Path<Uuid>) -> ApiResult<Json<crate::db::models::Deployment>> {
    let deployment = crate::db::deployments::find_by_id(&state.db_pool, id).await?.ok_or_else(|| crate::error::ApiError::not_found("deployment not found"))?;
    Ok(Json(deployment))
}

#[derive(Deserialize)]
struct DeployBody {
    release_id: Uuid,
    environment_id: Uuid,
}

async fn deploy(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(service_id): Path<Uuid>,
    Json(body): Json<DeployBody>,
) -> ApiResult<Json<crate::db::models::Deployment>> {
    let service = crate::db::services::find_by_id(&state.db_pool, service_id).await?.ok_or_else(|| crate::error::ApiError::not_found("service not found"))?;
    crate::auth::middleware::require_role(&state, &ctx, service.project_id, crate::db::models::Role::Developer).await?;

    let request_id = super::new_request_id();
    let deployment = crate::domain::deployment::deploy(&state.db_pool, &state.reconcile_queue, &state.audit_writer, ctx.user_id, &request_id, body.release_id, body.environment_id).await?;
    Ok(Json(deployment))
}

async fn rollback(State(state): State<AppState>, ctx: AuthContext, Path(id): Path<Uuid>) -> ApiResult<Json<crate::db::models::Deployment>> {
    let current = crate::db::deployments::find_by_id(&state.db_pool, id).await?.ok_or_else(|| crate::error::ApiError::not_found("deployment not found"))?;
    let service = crate::db::services::find_by_id(&state.db_pool, current.service_id).await?.ok_or_else(|| crate::error::ApiError::not_found("service not found"))?;
    crate::auth::middleware::require_role(&state, &ctx, service.project_id, crate::db::models::Role::Developer).await?;

    let request_id = super::new_request_id();
    let deployment = crate::domain::deployment::rollback(&state.db_pool, &state.reconcile_queue, &state.audit_writer, ctx.user_id, &request_id, id).await?;
    Ok(Json(deployment))
}
