use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::Environment;

pub async fn list_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Environment>> {
    sqlx::query_as::<_, Environment>(
        r#"SELECT id, project_id, name, default_namespace, variables, created_at, updated_at
           FROM environments WHERE project_id = $1 ORDER BY created_at ASC"#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list environments for project")
}

pub async fn find_by_name(pool: &PgPool, project_id: Uuid, name: &str) -> Result<Option<Environment>> {
    sqlx::query_as::<_, Environment>(
        r#"SELECT id, project_id, name, default_namespace, variables, created_at, updated_at
           FROM environments WHERE project_id = $1 AND name = $2"#,
    )
    .bind(project_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("failed to find environment by name")
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Environment>> {
    sqlx::query_as::<_, Environment>(
        r#"SELECT id, project_id, name, default_namespace, variables, created_at, updated_at
           FROM environments WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to find environment by id")
}

pub async fn create(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    default_namespace: &str,
    variables: serde_json::Value,
) -> Result<Environment> {
    sqlx::query_as::<_, Environment>(
        r#"INSERT INTO environments (project_id, name, default_namespace, variables)
           VALUES ($1, $2, $3, $4)
           RETURNING id, project_id, name, default_namespace, variables, created_at, updated_at"#,
    )
    .bind(project_id)
    .bind(name)
    .bind(default_namespace)
    .bind(variables)
    .fetch_one(pool)
    .await
    .context("failed to create environment")
}

pub async fn update_variables(pool: &PgPool, id: Uuid, variables: serde_json::Value) -> Result<Environment> {
    sqlx::query_as::<_, Environment>(
        r#"UPDATE environments SET variables = $2, updated_at = now()
           WHERE id = $1
           RETURNING id, project_id, name, default_namespace, variables, created_at, updated_at"#,
    )
    .bind(id)
    .bind(variables)
    .fetch_one(pool)
    .await
    .context("failed to update environment variables")
}
