use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{ProjectMember, Role, User};

pub async fn find_or_create(pool: &PgPool, email: &str) -> Result<User> {
    if let Some(user) = find_by_email(pool, email).await? {
        return Ok(user);
    }

    sqlx::query_as::<_, User>(
        r#"INSERT INTO users (email) VALUES ($1)
           ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
           RETURNING id, email, created_at"#,
    )
    .bind(email)
    .fetch_one(pool)
    .await
    .context("failed to create user")
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT id, email, created_at FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("failed to find user by email")
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT id, email, created_at FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to find user by id")
}

pub async fn role_in_project(pool: &PgPool, user_id: Uuid, project_id: Uuid) -> Result<Option<Role>> {
    let member = sqlx::query_as::<_, ProjectMember>(
        "SELECT project_id, user_id, role, created_at FROM project_members WHERE project_id = $1 AND user_id = $2",
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .context("failed to look up project membership")?;

    Ok(member.map(|m| m.role))
}

pub async fn set_role(pool: &PgPool, project_id: Uuid, user_id: Uuid, role: Role) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO project_members (project_id, user_id, role)
           VALUES ($1, $2, $3)
           ON CONFLICT (project_id, user_id) DO UPDATE SET role = EXCLUDED.role"#,
    )
    .bind(project_id)
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await
    .context("failed to set project role")?;
    Ok(())
}
