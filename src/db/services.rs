use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::Service;

pub async fn list_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Service>> {
    sqlx::query_as::<_, Service>(
        r#"SELECT id, project_id, name, git_repo_url, git_default_branch,
                  build_config, runtime_config, custom_domains, created_at, updated_at
           FROM services WHERE project_id = $1 ORDER BY created_at ASC"#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list services for project")
}

pub async fn find_by_name(pool: &PgPool, project_id: Uuid, name: &str) -> Result<Option<Service>> {
    sqlx::query_as::<_, Service>(
        r#"SELECT id, project_id, name, git_repo_url, git_default_branch,
                  build_config, runtime_config, custom_domains, created_at, updated_at
           FROM services WHERE project_id = $1 AND name = $2"#,
    )
    .bind(project_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("failed to find service by name")
}

/// Webhook delivery carries only the repo URL, so incoming pushes fan out
/// to every service tracking it rather than a single (project, name) pair.
pub async fn list_by_git_repo_url(pool: &PgPool, git_repo_url: &str) -> Result<Vec<Service>> {
    sqlx::query_as::<_, Service>(
        r#"SELECT id, project_id, name, git_repo_url, git_default_branch,
                  build_config, runtime_config, custom_domains, created_at, updated_at
           FROM services WHERE git_repo_url = $1"#,
    )
    .bind(git_repo_url)
    .fetch_all(pool)
    .await
    .context("failed to find services by git repo url")
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Service>> {
    sqlx::query_as::<_, Service>(
        r#"SELECT id, project_id, name, git_repo_url, git_default_branch,
                  build_config, runtime_config, custom_domains, created_at, updated_at
           FROM services WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to find service by id")
}

#[allow(clippy::too_many_arguments)]
pub async fn create(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    git_repo_url: &str,
    git_default_branch: &str,
    build_config: serde_json::Value,
    runtime_config: serde_json::Value,
    custom_domains: &[String],
) -> Result<Service> {
    sqlx::query_as::<_, Service>(
        r#"INSERT INTO services
               (project_id, name, git_repo_url, git_default_branch, build_config, runtime_config, custom_domains)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING id, project_id, name, git_repo_url, git_default_branch,
                     build_config, runtime_config, custom_domains, created_at, updated_at"#,
    )
    .bind(project_id)
    .bind(name)
    .bind(git_repo_url)
    .bind(git_default_branch)
    .bind(build_config)
    .bind(runtime_config)
    .bind(custom_domains)
    .fetch_one(pool)
    .await
    .context("failed to create service")
}

pub async fn update_runtime_config(pool: &PgPool, id: Uuid, runtime_config: serde_json::Value) -> Result<Service> {
    sqlx::query_as::<_, Service>(
        r#"UPDATE services SET runtime_config = $2, updated_at = now()
           WHERE id = $1
           RETURNING id, project_id, name, git_repo_url, git_default_branch,
                     build_config, runtime_config, custom_domains, created_at, updated_at"#,
    )
    .bind(id)
    .bind(runtime_config)
    .fetch_one(pool)
    .await
    .context("failed to update service runtime config")
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM services WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete service")?;
    Ok(())
}
