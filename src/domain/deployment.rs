use sqlx::PgPool;
use uuid::Uuid;

use crate::audit_writer::{AuditEvent, AuditWriter};
use crate::db::models::Deployment;
use crate::error::{ApiError, ApiResult};
use crate::reconciler::{ReconcileKey, ReconcileQueue};

/// `deploy(Release, Environment)`: one transaction validates the release is
/// ready, rejects a no-op redeploy of the already-current release, inserts
/// the new Deployment as current and supersedes whatever was current
/// before it. The reconciler is woken only after the transaction commits —
/// a reconcile racing ahead of the row it reads would see nothing.
pub async fn deploy(
    pool: &PgPool,
    queue: &ReconcileQueue,
    audit: &AuditWriter,
    actor: Uuid,
    request_id: &str,
    release_id: Uuid,
    environment_id: Uuid,
) -> ApiResult<Deployment> {
    let release = crate::db::releases::find_by_id(pool, release_id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::not_found("release not found"))?;

    if !release.is_ready() {
        return Err(ApiError::unprocessable(format!("release {release_id} is not ready to deploy")).with_field("release_id"));
    }

    let environment = crate::db::environments::find_by_id(pool, environment_id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::not_found("environment not found"))?;

    let service = crate::db::services::find_by_id(pool, release.service_id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::not_found("service not found"))?;

    if environment.project_id != service.project_id {
        return Err(ApiError::validation("environment_id", "environment does not belong to the service's project"));
    }

    let mut tx = pool.begin().await.map_err(|e| ApiError::internal_anyhow(e.into()))?;

    if let Some(current) = crate::db::deployments::find_current(&mut *tx, service.id, environment_id)
        .await
        .map_err(ApiError::internal_anyhow)?
    {
        if current.release_id == release_id {
            return Err(ApiError::conflict("this release is already the running deployment for this environment").with_field("release_id"));
        }
    }

    let runtime = service.runtime_config().map_err(ApiError::internal_anyhow)?;

    let deployment = crate::db::deployments::create_current(
        &mut tx,
        service.id,
        environment_id,
        release_id,
        runtime.replicas,
        None,
        serde_json::json!({}),
        Some(actor),
    )
    .await
    .map_err(ApiError::internal_anyhow)?;

    tx.commit().await.map_err(|e| ApiError::internal_anyhow(e.into()))?;

    queue.request(ReconcileKey { service_id: service.id, environment_id }).await;

    audit
        .record(AuditEvent {
            actor: actor.to_string(),
            action: "deployment.deploy".to_string(),
            resource: format!("deployment:{}", deployment.id),
            outcome: "pending".to_string(),
            request_id: request_id.to_string(),
        })
        .await;

    Ok(deployment)
}

/// Rolls back a Deployment by creating a new current Deployment that points
/// at the prior Release, flagged `rollback_of`. The reconciler resolves the
/// prior image (store first, ReplicaSet history fallback) when it next
/// runs — this only records the intent and wakes it.
pub async fn rollback(
    pool: &PgPool,
    queue: &ReconcileQueue,
    audit: &AuditWriter,
    actor: Uuid,
    request_id: &str,
    deployment_id: Uuid,
) -> ApiResult<Deployment> {
    let current = crate::db::deployments::find_by_id(pool, deployment_id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::not_found("deployment not found"))?;

    let prior = crate::db::deployments::find_prior_running(pool, current.service_id, current.environment_id, current.id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::unprocessable("no previous deployment to roll back to"))?;

    let service = crate::db::services::find_by_id(pool, current.service_id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::not_found("service not found"))?;
    let runtime = service.runtime_config().map_err(ApiError::internal_anyhow)?;

    let current_release = crate::db::releases::find_by_id(pool, current.release_id)
        .await
        .map_err(ApiError::internal_anyhow)?
        .ok_or_else(|| ApiError::not_found("release not found"))?;
    let current_image = current_release
        .image_uri
        .ok_or_else(|| ApiError::internal_anyhow(anyhow::anyhow!("current deployment's release has no image_uri")))?;

    let mut tx = pool.begin().await.map_err(|e| ApiError::internal_anyhow(e.into()))?;

    let annotations = serde_json::json!({
        "rollback-from": current_image,
        "rollback-at": chrono::Utc::now().to_rfc3339(),
    });

    let deployment = crate::db::deployments::create_current(
        &mut tx,
        current.service_id,
        current.environment_id,
        prior.release_id,
        runtime.replicas,
        Some(current.id),
        annotations,
        Some(actor),
    )
    .await
    .map_err(ApiError::internal_anyhow)?;

    tx.commit().await.map_err(|e| ApiError::internal_anyhow(e.into()))?;

    queue.request(ReconcileKey { service_id: current.service_id, environment_id: current.environment_id }).await;

    audit
        .record(AuditEvent {
            actor: actor.to_string(),
            action: "deployment.rollback".to_string(),
            resource: format!("deployment:{}", deployment.id),
            outcome: format!("rolled_back_to:{}", prior.id),
            request_id: request_id.to_string(),
        })
        .await;

    Ok(deployment)
}
