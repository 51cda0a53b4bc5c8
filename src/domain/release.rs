use sqlx::PgPool;
use uuid::Uuid;

use crate::audit_writer::{AuditEvent, AuditWriter};
use crate::db::models::BuildJob;
use crate::error::{ApiError, ApiResult};

/// `Service.triggerBuild(commitSHA)`: locates (or creates) the `pending`
/// Release for this sha, then enqueues a build job for it. Idempotent by
/// design — calling this twice for the same sha returns the same job.
pub async fn trigger_build(
    pool: &PgPool,
    audit: &AuditWriter,
    actor: Uuid,
    request_id: &str,
    service_id: Uuid,
    git_sha: &str,
    git_branch: Option<&str>,
    priority: i32,
    timeout_secs: i64,
) -> ApiResult<(BuildJob, bool)> {
    let service = crate::db::services::find_by_id(pool, service_id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::not_found("service not found"))?;

    let build_config = service.build_config().map_err(ApiError::internal_anyhow)?;
    let build_config_value = serde_json::to_value(&build_config).map_err(|e| ApiError::internal_anyhow(e.into()))?;

    let (release, _created) = crate::db::releases::find_or_create_pending(pool, service_id, git_sha, git_branch)
        .await
        .map_err(ApiError::internal_anyhow)?;

    let (job, is_new) = crate::db::build_jobs::enqueue(
        pool,
        release.id,
        service.id,
        service.project_id,
        &service.git_repo_url,
        git_branch,
        git_sha,
        build_config_value,
        timeout_secs,
        priority,
    )
    .await
    .map_err(ApiError::internal_anyhow)?;

    audit
        .record(AuditEvent {
            actor: actor.to_string(),
            action: "release.trigger_build".to_string(),
            resource: format!("service:{service_id}"),
            outcome: if is_new { "enqueued" } else { "already_active" }.to_string(),
            request_id: request_id.to_string(),
        })
        .await;

    Ok((job, is_new))
}
