use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::ApiKey;

pub async fn find_by_hash(pool: &PgPool, key_hash: &str) -> Result<Option<ApiKey>> {
    sqlx::query_as::<_, ApiKey>(
        r#"SELECT id, user_id, name, key_hash, scopes, revoked_at, created_at
           FROM api_keys WHERE key_hash = $1 AND revoked_at IS NULL"#,
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await
    .context("failed to find api key by hash")
}

pub async fn create(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    key_hash: &str,
    scopes: &[String],
) -> Result<ApiKey> {
    sqlx::query_as::<_, ApiKey>(
        r#"INSERT INTO api_keys (user_id, name, key_hash, scopes)
           VALUES ($1, $2, $3, $4)
           RETURNING id, user_id, name, key_hash, scopes, revoked_at, created_at"#,
    )
    .bind(user_id)
    .bind(name)
    .bind(key_hash)
    .bind(scopes)
    .fetch_one(pool)
    .await
    .context("failed to create api key")
}

pub async fn revoke(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE api_keys SET revoked_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to revoke api key")?;
    Ok(())
}
