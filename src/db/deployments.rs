use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::models::{Deployment, DeploymentStatus, ObservedHealth};

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Deployment>> {
    sqlx::query_as::<_, Deployment>(
        r#"SELECT id, service_id, environment_id, release_id, status, observed_health,
                  desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                  created_by, created_at, updated_at
           FROM deployments WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to find deployment by id")
}

pub async fn list_for_service(pool: &PgPool, service_id: Uuid) -> Result<Vec<Deployment>> {
    sqlx::query_as::<_, Deployment>(
        r#"SELECT id, service_id, environment_id, release_id, status, observed_health,
                  desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                  created_by, created_at, updated_at
           FROM deployments WHERE service_id = $1 ORDER BY created_at DESC"#,
    )
    .bind(service_id)
    .fetch_all(pool)
    .await
    .context("failed to list deployments for service")
}

/// The single non-superseded Deployment for a (Service, Environment) pair, if any.
pub async fn find_current(
    pool_or_tx: impl sqlx::PgExecutor<'_>,
    service_id: Uuid,
    environment_id: Uuid,
) -> Result<Option<Deployment>> {
    sqlx::query_as::<_, Deployment>(
        r#"SELECT id, service_id, environment_id, release_id, status, observed_health,
                  desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                  created_by, created_at, updated_at
           FROM deployments
           WHERE service_id = $1 AND environment_id = $2 AND superseded_by IS NULL
           FOR UPDATE"#,
    )
    .bind(service_id)
    .bind(environment_id)
    .fetch_optional(pool_or_tx)
    .await
    .context("failed to find current deployment")
}

/// Most recent Deployment in (S, E) that reached a running state prior to
/// the current one — the rollback source.
pub async fn find_prior_running(
    pool: &PgPool,
    service_id: Uuid,
    environment_id: Uuid,
    before: Uuid,
) -> Result<Option<Deployment>> {
    sqlx::query_as::<_, Deployment>(
        r#"SELECT id, service_id, environment_id, release_id, status, observed_health,
                  desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                  created_by, created_at, updated_at
           FROM deployments
           WHERE service_id = $1 AND environment_id = $2
             AND id != $3
             AND status IN ('Running', 'Degraded', 'Superseded')
           ORDER BY created_at DESC LIMIT 1"#,
    )
    .bind(service_id)
    .bind(environment_id)
    .bind(before)
    .fetch_optional(pool)
    .await
    .context("failed to find prior running deployment")
}

/// Insert a new Deployment as current, superseding whatever was current
/// before it, inside a single transaction so the invariant "at most one
/// non-superseded Deployment per (Service, Environment)" always holds.
pub async fn create_current(
    tx: &mut Transaction<'_, Postgres>,
    service_id: Uuid,
    environment_id: Uuid,
    release_id: Uuid,
    desired_replicas: i32,
    rollback_of: Option<Uuid>,
    annotations: serde_json::Value,
    created_by: Option<Uuid>,
) -> Result<Deployment> {
    let previous = find_current(&mut **tx, service_id, environment_id).await?;

    let deployment = sqlx::query_as::<_, Deployment>(
        r#"INSERT INTO deployments
               (service_id, environment_id, release_id, status, observed_health,
                desired_replicas, ready_replicas, rollback_of, annotations, created_by)
           VALUES ($1, $2, $3, 'Pending', 'Unknown', $4, 0, $5, $6, $7)
           RETURNING id, service_id, environment_id, release_id, status, observed_health,
                     desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                     created_by, created_at, updated_at"#,
    )
    .bind(service_id)
    .bind(environment_id)
    .bind(release_id)
    .bind(desired_replicas)
    .bind(rollback_of)
    .bind(annotations)
    .bind(created_by)
    .fetch_one(&mut **tx)
    .await
    .context("failed to insert new current deployment")?;

    if let Some(prev) = previous {
        sqlx::query("UPDATE deployments SET superseded_by = $2, status = 'Superseded', updated_at = now() WHERE id = $1")
            .bind(prev.id)
            .bind(deployment.id)
            .execute(&mut **tx)
            .await
            .context("failed to supersede previous deployment")?;
    }

    Ok(deployment)
}

pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    status: DeploymentStatus,
) -> Result<Deployment> {
    sqlx::query_as::<_, Deployment>(
        r#"UPDATE deployments SET status = $2, updated_at = now()
           WHERE id = $1
           RETURNING id, service_id, environment_id, release_id, status, observed_health,
                     desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                     created_by, created_at, updated_at"#,
    )
    .bind(id)
    .bind(status)
    .fetch_one(pool)
    .await
    .context("failed to update deployment status")
}

pub async fn update_observed(
    pool: &PgPool,
    id: Uuid,
    status: DeploymentStatus,
    observed_health: ObservedHealth,
    ready_replicas: i32,
) -> Result<Deployment> {
    sqlx::query_as::<_, Deployment>(
        r#"UPDATE deployments
           SET status = $2, observed_health = $3, ready_replicas = $4, updated_at = now()
           WHERE id = $1
           RETURNING id, service_id, environment_id, release_id, status, observed_health,
                     desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                     created_by, created_at, updated_at"#,
    )
    .bind(id)
    .bind(status)
    .bind(observed_health)
    .bind(ready_replicas)
    .fetch_one(pool)
    .await
    .context("failed to update deployment observed status")
}

pub async fn mark_cancelling(pool: &PgPool, id: Uuid) -> Result<Deployment> {
    update_status(pool, id, DeploymentStatus::Cancelling).await
}

pub async fn mark_terminating(pool: &PgPool, id: Uuid) -> Result<Deployment> {
    update_status(pool, id, DeploymentStatus::Terminating).await
}

/// All non-terminal Deployments across the cluster, for the reconciler's
/// per-(Service, Environment) work queue.
pub async fn list_active(pool: &PgPool) -> Result<Vec<Deployment>> {
    sqlx::query_as::<_, Deployment>(
        r#"SELECT id, service_id, environment_id, release_id, status, observed_health,
                  desired_replicas, ready_replicas, superseded_by, rollback_of, annotations,
                  created_by, created_at, updated_at
           FROM deployments
           WHERE status NOT IN ('Stopped', 'Superseded', 'Failed', 'Cancelled')
           ORDER BY updated_at ASC"#,
    )
    .fetch_all(pool)
    .await
    .context("failed to list active deployments")
}

#[cfg(test)]
mod tests {
    use super::super::models::Deployment;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample(superseded_by: Option<Uuid>) -> Deployment {
        Deployment {
            id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            environment_id: Uuid::new_v4(),
            release_id: Uuid::new_v4(),
            status: super::DeploymentStatus::Running,
            observed_health: super::ObservedHealth::Healthy,
            desired_replicas: 2,
            ready_replicas: 2,
            superseded_by,
            rollback_of: None,
            annotations: serde_json::json!({}),
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn is_current_reflects_superseded_by() {
        assert!(sample(None).is_current());
        assert!(!sample(Some(Uuid::new_v4())).is_current());
    }
}
