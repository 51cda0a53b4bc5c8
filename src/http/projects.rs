use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/projects", get(list).post(create))
        .route("/v1/projects/{id}", get(get_one).delete(remove))
}

#[derive(Deserialize)]
struct CreateProjectBody {
    slug: String,
    name: String,
    description: Option<String>,
}

async fn list(State(state): State<AppState>, _ctx: AuthContext) -> ApiResult<Json<Vec<crate::db::models::Project>>> {
    let projects = crate::db::projects::list(&state.db_pool).await?;
    Ok(Json(projects))
}

async fn create(State(state): State<AppState>, ctx: AuthContext, Json(body): Json<CreateProjectBody>) -> ApiResult<Json<crate::db::models::Project>> {
    let request_id = super::new_request_id();
    let project = crate::domain::project::create_project(&state.db_pool, &state.audit_writer, ctx.user_id, &request_id, &body.slug, &body.name, body.description.as_deref()).await?;
    Ok(Json(project))
}

async fn get_one(State(state): State<AppState>, _ctx: AuthContext, Path(id): Path<Uuid>) -> ApiResult<Json<crate::db::models::Project>> {
    let project = crate::db::projects::find_by_id(&state.db_pool, id).await?.ok_or_else(|| crate::error::ApiError::not_found("project not found"))?;
    Ok(Json(project))
}

async fn remove(State(state): State<AppState>, ctx: AuthContext, Path(id): Path<Uuid>) -> ApiResult<Json<serde_json::Value>> {
    crate::auth::middleware::require_role(&state, &ctx, id, crate::db::models::Role::Owner).await?;
    let request_id = super::new_request_id();
    crate::domain::project::delete_project(&state.db_pool, &state.audit_writer, ctx.user_id, &request_id, id).await?;
    Ok(Json(serde_json::json!({ "status": "deleting" })))
}
