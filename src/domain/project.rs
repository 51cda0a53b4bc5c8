use sqlx::PgPool;
use uuid::Uuid;

use crate::audit_writer::{AuditEvent, AuditWriter};
use crate::db::models::{Environment, Project, Service};
use crate::error::{ApiError, ApiResult};

/// Project/Service/Environment CRUD has no cross-table transaction to
/// coordinate beyond what the repository layer already guarantees (unique
/// slugs, foreign keys) — these wrappers exist to attach the audit trail
/// every mutating call needs, not to add business logic of their own.
pub async fn create_project(pool: &PgPool, audit: &AuditWriter, actor: Uuid, request_id: &str, slug: &str, name: &str, description: Option<&str>) -> ApiResult<Project> {
    if crate::db::projects::find_by_slug(pool, slug).await.map_err(ApiError::internal_anyhow)?.is_some() {
        return Err(ApiError::conflict(format!("project slug '{slug}' already exists")).with_field("slug"));
    }
    let project = crate::db::projects::create(pool, slug, name, description).await.map_err(ApiError::internal_anyhow)?;
    audit.record(AuditEvent { actor: actor.to_string(), action: "project.create".into(), resource: format!("project:{}", project.id), outcome: "created".into(), request_id: request_id.into() }).await;
    Ok(project)
}

pub async fn delete_project(pool: &PgPool, audit: &AuditWriter, actor: Uuid, request_id: &str, project_id: Uuid) -> ApiResult<()> {
    if crate::db::projects::has_active_services(pool, project_id).await.map_err(ApiError::internal_anyhow)? {
        return Err(ApiError::conflict("project still has active services; remove them first"));
    }
    crate::db::projects::update_status(pool, project_id, crate::db::models::ProjectStatus::Deleting).await.map_err(ApiError::internal_anyhow)?;
    audit.record(AuditEvent { actor: actor.to_string(), action: "project.delete".into(), resource: format!("project:{project_id}"), outcome: "deleting".into(), request_id: request_id.into() }).await;
    Ok(())
}

pub async fn create_service(
    pool: &PgPool,
    audit: &AuditWriter,
    actor: Uuid,
    request_id: &str,
    project_id: Uuid,
    name: &str,
    git_repo_url: &str,
    git_default_branch: &str,
    build_config: serde_json::Value,
    runtime_config: serde_json::Value,
    custom_domains: &[String],
) -> ApiResult<Service> {
    if crate::db::services::find_by_name(pool, project_id, name).await.map_err(ApiError::internal_anyhow)?.is_some() {
        return Err(ApiError::conflict(format!("service '{name}' already exists in this project")).with_field("name"));
    }
    let service = crate::db::services::create(pool, project_id, name, git_repo_url, git_default_branch, build_config, runtime_config, custom_domains)
        .await
        .map_err(ApiError::internal_anyhow)?;
    audit.record(AuditEvent { actor: actor.to_string(), action: "service.create".into(), resource: format!("service:{}", service.id), outcome: "created".into(), request_id: request_id.into() }).await;
    Ok(service)
}

pub async fn create_environment(
    pool: &PgPool,
    audit: &AuditWriter,
    actor: Uuid,
    request_id: &str,
    project_id: Uuid,
    name: &str,
    default_namespace: &str,
    variables: serde_json::Value,
) -> ApiResult<Environment> {
    if crate::db::environments::find_by_name(pool, project_id, name).await.map_err(ApiError::internal_anyhow)?.is_some() {
        return Err(ApiError::conflict(format!("environment '{name}' already exists in this project")).with_field("name"));
    }
    let environment = crate::db::environments::create(pool, project_id, name, default_namespace, variables)
        .await
        .map_err(ApiError::internal_anyhow)?;
    audit.record(AuditEvent { actor: actor.to_string(), action: "environment.create".into(), resource: format!("environment:{}", environment.id), outcome: "created".into(), request_id: request_id.into() }).await;
    Ok(environment)
}
