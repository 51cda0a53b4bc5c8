use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Release, ReleaseStatus};

pub async fn find_by_service_and_sha(
    pool: &PgPool,
    service_id: Uuid,
    git_sha: &str,
) -> Result<Option<Release>> {
    sqlx::query_as::<_, Release>(
        r#"SELECT id, service_id, git_sha, git_branch, status, image_uri, image_digest,
                  image_size_bytes, sbom, sbom_format, signature_ref, build_duration_ms,
                  error_message, created_at, updated_at
           FROM releases WHERE service_id = $1 AND git_sha = $2"#,
    )
    .bind(service_id)
    .bind(git_sha)
    .fetch_optional(pool)
    .await
    .context("failed to find release by service and sha")
}

pub async fn list_for_service(pool: &PgPool, service_id: Uuid, limit: i64) -> Result<Vec<Release>> {
    sqlx::query_as::<_, Release>(
        r#"SELECT id, service_id, git_sha, git_branch, status, image_uri, image_digest,
                  image_size_bytes, sbom, sbom_format, signature_ref, build_duration_ms,
                  error_message, created_at, updated_at
           FROM releases WHERE service_id = $1 ORDER BY created_at DESC LIMIT $2"#,
    )
    .bind(service_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list releases for service")
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Release>> {
    sqlx::query_as::<_, Release>(
        r#"SELECT id, service_id, git_sha, git_branch, status, image_uri, image_digest,
                  image_size_bytes, sbom, sbom_format, signature_ref, build_duration_ms,
                  error_message, created_at, updated_at
           FROM releases WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to find release by id")
}

/// Idempotent: relies on the unique index on (service_id, git_sha). On a
/// unique-violation race, re-reads the row another caller just inserted so
/// two concurrent `build()` calls observe exactly one Release.
pub async fn find_or_create_pending(
    pool: &PgPool,
    service_id: Uuid,
    git_sha: &str,
    git_branch: Option<&str>,
) -> Result<(Release, bool)> {
    if let Some(existing) = find_by_service_and_sha(pool, service_id, git_sha).await? {
        return Ok((existing, false));
    }

    let inserted = sqlx::query_as::<_, Release>(
        r#"INSERT INTO releases (service_id, git_sha, git_branch, status)
           VALUES ($1, $2, $3, 'Pending')
           ON CONFLICT (service_id, git_sha) DO NOTHING
           RETURNING id, service_id, git_sha, git_branch, status, image_uri, image_digest,
                     image_size_bytes, sbom, sbom_format, signature_ref, build_duration_ms,
                     error_message, created_at, updated_at"#,
    )
    .bind(service_id)
    .bind(git_sha)
    .bind(git_branch)
    .fetch_optional(pool)
    .await
    .context("failed to insert release")?;

    match inserted {
        Some(release) => Ok((release, true)),
        None => {
            let release = find_by_service_and_sha(pool, service_id, git_sha)
                .await?
                .context("release vanished after conflicting insert")?;
            Ok((release, false))
        }
    }
}

pub async fn mark_building(pool: &PgPool, id: Uuid) -> Result<Release> {
    sqlx::query_as::<_, Release>(
        r#"UPDATE releases SET status = 'Building', updated_at = now()
           WHERE id = $1 AND status = 'Pending'
           RETURNING id, service_id, git_sha, git_branch, status, image_uri, image_digest,
                     image_size_bytes, sbom, sbom_format, signature_ref, build_duration_ms,
                     error_message, created_at, updated_at"#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .context("failed to mark release building")
}

#[allow(clippy::too_many_arguments)]
pub async fn mark_ready(
    pool: &PgPool,
    id: Uuid,
    image_uri: &str,
    image_digest: &str,
    image_size_bytes: i64,
    sbom: Option<serde_json::Value>,
    sbom_format: Option<&str>,
    signature_ref: Option<&str>,
    build_duration_ms: i64,
) -> Result<Release> {
    sqlx::query_as::<_, Release>(
        r#"UPDATE releases
           SET status = 'Ready', image_uri = $2, image_digest = $3, image_size_bytes = $4,
               sbom = $5, sbom_format = $6, signature_ref = $7, build_duration_ms = $8,
               updated_at = now()
           WHERE id = $1
           RETURNING id, service_id, git_sha, git_branch, status, image_uri, image_digest,
                     image_size_bytes, sbom, sbom_format, signature_ref, build_duration_ms,
                     error_message, created_at, updated_at"#,
    )
    .bind(id)
    .bind(image_uri)
    .bind(image_digest)
    .bind(image_size_bytes)
    .bind(sbom)
    .bind(sbom_format)
    .bind(signature_ref)
    .bind(build_duration_ms)
    .fetch_one(pool)
    .await
    .context("failed to mark release ready")
}

pub async fn mark_failed(pool: &PgPool, id: Uuid, error_message: &str) -> Result<Release> {
    sqlx::query_as::<_, Release>(
        r#"UPDATE releases SET status = 'Failed', error_message = $2, updated_at = now()
           WHERE id = $1
           RETURNING id, service_id, git_sha, git_branch, status, image_uri, image_digest,
                     image_size_bytes, sbom, sbom_format, signature_ref, build_duration_ms,
                     error_message, created_at, updated_at"#,
    )
    .bind(id)
    .bind(error_message)
    .fetch_one(pool)
    .await
    .context("failed to mark release failed")
}

impl Release {
    pub fn is_ready(&self) -> bool {
        self.status == ReleaseStatus::Ready
    }
}
