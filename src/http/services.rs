use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/projects/{project_id}/services", get(list).post(create))
        .route("/v1/services/{id}", get(get_one))
        .route("/v1/services/{id}/build", axum::routing::post(trigger_build))
}

#[derive(Deserialize)]
struct CreateServiceBody {
    name: String,
    git_repo_url: String,
    #[serde(default = "default_branch")]
    git_default_branch: String,
    #[serde(default = "default_build_config")]
    build_config: serde_json::Value,
    #[serde(default = "default_runtime_config")]
    runtime_config: serde_json::Value,
    #[serde(default)]
    custom_domains: Vec<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_build_config() -> serde_json::Value {
    serde_json::json!({ "type": "auto" })
}

fn default_runtime_config() -> serde_json::Value {
    serde_json::json!({
        "port": 8080,
        "replicas": 1,
        "resource_requests": { "cpu_millicores": 100, "memory_mb": 128 },
        "resource_limits": { "cpu_millicores": 1000, "memory_mb": 512 },
        "health_check": { "path": "/health", "port": 8080 },
        "autoscale_min": 1,
        "autoscale_max": 1,
    })
}

async fn list(State(state): State<AppState>, _ctx: AuthContext, Path(project_id): Path<Uuid>) -> ApiResult<Json<Vec<crate::db::models::Service>>> {
    let services = crate::db::services::list_for_project(&state.db_pool, project_id).await?;
    Ok(Json(services))
}

async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateServiceBody>,
) -> ApiResult<Json<crate::db::models::Service>> {
    crate::auth::middleware::require_role(&state, &ctx, project_id, crate::db::models::Role::Developer).await?;
    let request_id = super::new_request_id();
    let service = crate::domain::project::create_service(
        &state.db_pool,
        &state.audit_writer,
        ctx.user_id,
        &request_id,
        project_id,
        &body.name,
        &body.git_repo_url,
        &body.git_default_branch,
        body.build_config,
        body.runtime_config,
        &body.custom_domains,
    )
    .await?;
    Ok(Json(service))
}

async fn get_one(State(state): State<AppState>, _ctx: AuthContext, Path(id): Path<Uuid>) -> ApiResult<Json<crate::db::models::Service>> {
    let service = crate::db::services::find_by_id(&state.db_pool, id).await?.ok_or_else(|| crate::error::ApiError::not_found("service not found"))?;
    Ok(Json(service))
}

#[derive(Deserialize)]
struct TriggerBuildBody {
    git_sha: String,
    git_branch: Option<String>,
    #[serde(default)]
    priority: i32,
}

async fn trigger_build(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(id): Path<Uuid>,
    Json(body): Json<TriggerBuildBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let service = crate::db::services::find_by_id(&state.db_pool, id).await?.ok_or_else(|| crate::error::ApiError::not_found("service not found"))?;
    crate::auth::middleware::require_role(&state, &ctx, service.project_id, crate::db::models::Role::Developer).await?;

    let request_id = super::new_request_id();
    let (job, is_new) = crate::domain::release::trigger_build(
        &state.db_pool,
        &state.audit_writer,
        ctx.user_id,
        &request_id,
        id,
        &body.git_sha,
        body.git_branch.as_deref(),
        body.priority,
        state.build_settings.build_timeout_secs as i64,
    )
    .await?;

    Ok(Json(serde_json::json!({ "job_id": job.id, "release_id": job.release_id, "enqueued": is_new })))
}
