use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::middleware::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/projects/{project_id}/environments", get(list).post(create))
}

#[derive(Deserialize)]
struct CreateEnvironmentBody {
    name: String,
    default_namespace: String,
    #[serde(default)]
    variables: serde_json::Value,
}

async fn list(State(state): State<AppState>, _ctx: AuthContext, Path(project_id): Path<Uuid>) -> ApiResult<Json<Vec<crate::db::models::Environment>>> {
    let environments = crate::db::environments::list_for_project(&state.db_pool, project_id).await?;
    Ok(Json(environments))
}

async fn create(
    State(state): State<AppState>,
    ctx: AuthContext,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateEnvironmentBody>,
) -> ApiResult<Json<crate::db::models::Environment>> {
    crate::auth::middleware::require_role(&state, &ctx, project_id, crate::db::models::Role::Developer).await?;
    let variables = if body.variables.is_null() { serde_json::json!({}) } else { body.variables };
    let request_id = super::new_request_id();
    let environment = crate::domain::project::create_environment(&state.db_pool, &state.audit_writer, ctx.user_id, &request_id, project_id, &body.name, &body.default_namespace, variables).await?;
    Ok(Json(environment))
}
