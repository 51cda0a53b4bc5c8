use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::Session;

pub async fn create(pool: &PgPool, user_id: Uuid, ttl: Duration) -> Result<Session> {
    sqlx::query_as::<_, Session>(
        r#"INSERT INTO sessions (user_id, revoked, expires_at)
           VALUES ($1, false, $2)
           RETURNING id, user_id, revoked, expires_at, created_at"#,
    )
    .bind(user_id)
    .bind(Utc::now() + ttl)
    .fetch_one(pool)
    .await
    .context("failed to create session")
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Session>> {
    sqlx::query_as::<_, Session>(
        "SELECT id, user_id, revoked, expires_at, created_at FROM sessions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to find session by id")
}

pub async fn revoke(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE sessions SET revoked = true WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to revoke session")?;
    Ok(())
}
