use anyhow::{Context, Result};
use sqlx::PgPool;

use super::models::AuditLogEntry;

/// Append-only by construction: there is no `update`/`delete` in this module.
pub async fn append(
    pool: &PgPool,
    actor: &str,
    action: &str,
    resource: &str,
    outcome: &str,
    request_id: &str,
) -> Result<AuditLogEntry> {
    sqlx::query_as::<_, AuditLogEntry>(
        r#"INSERT INTO audit_logs (actor, action, resource, outcome, request_id)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING id, actor, action, resource, outcome, request_id, created_at"#,
    )
    .bind(actor)
    .bind(action)
    .bind(resource)
    .bind(outcome)
    .bind(request_id)
    .fetch_one(pool)
    .await
    .context("failed to append audit log entry")
}

pub async fn list_for_resource(pool: &PgPool, resource: &str, limit: i64) -> Result<Vec<AuditLogEntry>> {
    sqlx::query_as::<_, AuditLogEntry>(
        r#"SELECT id, actor, action, resource, outcome, request_id, created_at
           FROM audit_logs WHERE resource = $1 ORDER BY created_at DESC LIMIT $2"#,
    )
    .bind(resource)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list audit log entries for resource")
}
