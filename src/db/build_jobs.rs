use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{BuildJob, BuildJobStatus};

#[allow(clippy::too_many_arguments)]
pub async fn enqueue(
    pool: &PgPool,
    release_id: Uuid,
    service_id: Uuid,
    project_id: Uuid,
    git_repo_url: &str,
    git_branch: Option<&str>,
    git_sha: &str,
    build_config: serde_json::Value,
    timeout_secs: i64,
    priority: i32,
) -> Result<(BuildJob, bool)> {
    // At-most-one-active-build per (service, sha): an active job already
    // queued or running for this release is returned instead of a new one.
    if let Some(existing) = find_active_for_release(pool, release_id).await? {
        return Ok((existing, false));
    }

    let job = sqlx::query_as::<_, BuildJob>(
        r#"INSERT INTO build_jobs
               (release_id, service_id, project_id, git_repo_url, git_branch, git_sha,
                build_config, timeout_secs, priority, status)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'Queued')
           RETURNING id, release_id, service_id, project_id, git_repo_url, git_branch, git_sha,
                     build_config, timeout_secs, priority, status, leased_by, lease_expires_at,
                     attempt_count, error_kind, error_message, created_at, updated_at"#,
    )
    .bind(release_id)
    .bind(service_id)
    .bind(project_id)
    .bind(git_repo_url)
    .bind(git_branch)
    .bind(git_sha)
    .bind(build_config)
    .bind(timeout_secs)
    .bind(priority)
    .fetch_one(pool)
    .await
    .context("failed to enqueue build job")?;

    Ok((job, true))
}

pub async fn find_active_for_release(pool: &PgPool, release_id: Uuid) -> Result<Option<BuildJob>> {
    sqlx::query_as::<_, BuildJob>(
        r#"SELECT id, release_id, service_id, project_id, git_repo_url, git_branch, git_sha,
                  build_config, timeout_secs, priority, status, leased_by, lease_expires_at,
                  attempt_count, error_kind, error_message, created_at, updated_at
           FROM build_jobs
           WHERE release_id = $1 AND status IN ('Queued', 'Running', 'Cancelling')
           ORDER BY created_at DESC LIMIT 1"#,
    )
    .bind(release_id)
    .fetch_optional(pool)
    .await
    .context("failed to find active build job for release")
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<BuildJob>> {
    sqlx::query_as::<_, BuildJob>(
        r#"SELECT id, release_id, service_id, project_id, git_repo_url, git_branch, git_sha,
                  build_config, timeout_secs, priority, status, leased_by, lease_expires_at,
                  attempt_count, error_kind, error_message, created_at, updated_at
           FROM build_jobs WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to find build job by id")
}

/// Atomic compare-and-set lease acquisition. Picks the next dispatchable job:
/// FIFO within a service (oldest `git_sha` first), priority then FIFO across
/// services. A job is dispatchable if it is `Queued`, or `Running` with an
/// expired lease (re-dispatch path), up to `max_attempts`.
pub async fn lease_next(
    pool: &PgPool,
    worker_id: &str,
    lease_duration_secs: i64,
    max_attempts: i32,
) -> Result<Option<BuildJob>> {
    let job = sqlx::query_as::<_, BuildJob>(
        r#"
        WITH candidate AS (
            SELECT id FROM build_jobs
            WHERE (status = 'Queued')
               OR (status = 'Running' AND lease_expires_at < now() AND attempt_count < $3)
            ORDER BY priority DESC, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE build_jobs
        SET status = 'Running',
            leased_by = $1,
            lease_expires_at = now() + make_interval(secs => $2),
            attempt_count = attempt_count + 1,
            updated_at = now()
        WHERE id = (SELECT id FROM candidate)
        RETURNING id, release_id, service_id, project_id, git_repo_url, git_branch, git_sha,
                  build_config, timeout_secs, priority, status, leased_by, lease_expires_at,
                  attempt_count, error_kind, error_message, created_at, updated_at
        "#,
    )
    .bind(worker_id)
    .bind(lease_duration_secs)
    .bind(max_attempts)
    .fetch_optional(pool)
    .await
    .context("failed to lease next build job")?;

    Ok(job)
}

pub async fn renew_lease(pool: &PgPool, id: Uuid, lease_duration_secs: i64) -> Result<()> {
    sqlx::query(
        "UPDATE build_jobs SET lease_expires_at = now() + make_interval(secs => $2), updated_at = now()
         WHERE id = $1 AND status = 'Running'",
    )
    .bind(id)
    .bind(lease_duration_secs)
    .execute(pool)
    .await
    .context("failed to renew build job lease")?;
    Ok(())
}

pub async fn mark_cancelling(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE build_jobs SET status = 'Cancelling', updated_at = now() WHERE id = $1 AND status IN ('Queued', 'Running')")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark build job cancelling")?;
    Ok(())
}

pub async fn mark_terminal(
    pool: &PgPool,
    id: Uuid,
    status: BuildJobStatus,
    error_kind: Option<&str>,
    error_message: Option<&str>,
) -> Result<BuildJob> {
    sqlx::query_as::<_, BuildJob>(
        r#"UPDATE build_jobs
           SET status = $2, error_kind = $3, error_message = $4, updated_at = now()
           WHERE id = $1
           RETURNING id, release_id, service_id, project_id, git_repo_url, git_branch, git_sha,
                     build_config, timeout_secs, priority, status, leased_by, lease_expires_at,
                     attempt_count, error_kind, error_message, created_at, updated_at"#,
    )
    .bind(id)
    .bind(status)
    .bind(error_kind)
    .bind(error_message)
    .fetch_one(pool)
    .await
    .context("failed to mark build job terminal")
}

/// Jobs whose lease expired without reaching `max_attempts` are re-dispatched
/// by `lease_next`; jobs that exhausted their attempts are marked failed here.
pub async fn reap_expired_leases(pool: &PgPool, max_attempts: i32) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        r#"UPDATE build_jobs
           SET status = 'Failed', error_kind = 'retry_exhausted',
               error_message = 'build job exceeded maximum lease attempts', updated_at = now()
           WHERE status = 'Running' AND lease_expires_at < now() AND attempt_count >= $1
           RETURNING id"#,
    )
    .bind(max_attempts)
    .fetch_all(pool)
    .await
    .context("failed to reap expired build job leases")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn timed_out_jobs(pool: &PgPool) -> Result<Vec<BuildJob>> {
    sqlx::query_as::<_, BuildJob>(
        r#"SELECT id, release_id, service_id, project_id, git_repo_url, git_branch, git_sha,
                  build_config, timeout_secs, priority, status, leased_by, lease_expires_at,
                  attempt_count, error_kind, error_message, created_at, updated_at
           FROM build_jobs
           WHERE status = 'Running'
             AND created_at < now() - (timeout_secs || ' seconds')::interval"#,
    )
    .fetch_all(pool)
    .await
    .context("failed to list timed-out build jobs")
}

pub fn lease_is_current(job: &BuildJob, worker_id: &str, now: DateTime<Utc>) -> bool {
    job.leased_by.as_deref() == Some(worker_id)
        && job.lease_expires_at.map(|exp| exp > now).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_job(leased_by: Option<&str>, expires_in: i64) -> BuildJob {
        BuildJob {
            id: Uuid::new_v4(),
            release_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            git_repo_url: "https://example/git".into(),
            git_branch: None,
            git_sha: "deadbeef".into(),
            build_config: serde_json::json!({"type": "auto"}),
            timeout_secs: 1800,
            priority: 0,
            status: BuildJobStatus::Running,
            leased_by: leased_by.map(str::to_string),
            lease_expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
            attempt_count: 1,
            error_kind: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn lease_is_current_requires_matching_worker_and_future_expiry() {
        let job = sample_job(Some("worker-1"), 60);
        assert!(lease_is_current(&job, "worker-1", Utc::now()));
        assert!(!lease_is_current(&job, "worker-2", Utc::now()));

        let expired = sample_job(Some("worker-1"), -60);
        assert!(!lease_is_current(&expired, "worker-1", Utc::now()));
    }
}
