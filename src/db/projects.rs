use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use super::models::{Project, ProjectStatus};

/// `[a-z0-9][a-z0-9-]{0,62}` — enforced again here as a belt-and-suspenders
/// check against the unique index, since the handler layer validates it too.
pub fn slug_is_valid(slug: &str) -> bool {
    lazy_static::lazy_static! {
        static ref SLUG_RE: regex::Regex = regex::Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").unwrap();
    }
    SLUG_RE.is_match(slug)
}

pub async fn list(pool: &PgPool) -> Result<Vec<Project>> {
    sqlx::query_as::<_, Project>(
        r#"SELECT id, slug, name, description, status, created_at, updated_at
           FROM projects ORDER BY created_at DESC"#,
    )
    .fetch_all(pool)
    .await
    .context("failed to list projects")
}

pub async fn find_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Project>> {
    sqlx::query_as::<_, Project>(
        r#"SELECT id, slug, name, description, status, created_at, updated_at
           FROM projects WHERE slug = $1"#,
    )
    .bind(slug)
    .fetch_optional(pool)
    .await
    .context("failed to find project by slug")
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    sqlx::query_as::<_, Project>(
        r#"SELECT id, slug, name, description, status, created_at, updated_at
           FROM projects WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to find project by id")
}

pub async fn create(pool: &PgPool, slug: &str, name: &str, description: Option<&str>) -> Result<Project> {
    sqlx::query_as::<_, Project>(
        r#"INSERT INTO projects (slug, name, description, status)
           VALUES ($1, $2, $3, 'Active')
           RETURNING id, slug, name, description, status, created_at, updated_at"#,
    )
    .bind(slug)
    .bind(name)
    .bind(description)
    .fetch_one(pool)
    .await
    .context("failed to create project")
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<Project> {
    sqlx::query_as::<_, Project>(
        r#"UPDATE projects
           SET name = COALESCE($2, name),
               description = COALESCE($3, description),
               updated_at = now()
           WHERE id = $1
           RETURNING id, slug, name, description, status, created_at, updated_at"#,
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .fetch_one(pool)
    .await
    .context("failed to update project")
}

pub async fn update_status(pool: &PgPool, id: Uuid, status: ProjectStatus) -> Result<Project> {
    sqlx::query_as::<_, Project>(
        r#"UPDATE projects SET status = $2, updated_at = now()
           WHERE id = $1
           RETURNING id, slug, name, description, status, created_at, updated_at"#,
    )
    .bind(id)
    .bind(status)
    .fetch_one(pool)
    .await
    .context("failed to update project status")
}

/// A project may only be hard-deleted once it holds no non-terminated
/// services; enforced here in addition to the domain service check.
pub async fn has_active_services(pool: &PgPool, project_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM services WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(pool)
        .await
        .context("failed to count services for project")?;
    Ok(count > 0)
}

pub async fn find_deleting(pool: &PgPool, limit: i64) -> Result<Vec<Project>> {
    sqlx::query_as::<_, Project>(
        r#"SELECT id, slug, name, description, status, created_at, updated_at
           FROM projects WHERE status = 'Deleting' ORDER BY updated_at ASC LIMIT $1"#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list deleting projects")
}

pub async fn delete(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete project")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation_matches_spec_regex() {
        assert!(slug_is_valid("demo"));
        assert!(slug_is_valid("a"));
        assert!(slug_is_valid("a0-b1"));
        assert!(!slug_is_valid(""));
        assert!(!slug_is_valid("-leading-dash"));
        assert!(!slug_is_valid("Has-Upper"));
        assert!(!slug_is_valid(&"a".repeat(64)));
        assert!(slug_is_valid(&"a".repeat(63)));
    }
}
