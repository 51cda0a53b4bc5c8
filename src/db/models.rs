use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum Role {
    #[sqlx(rename = "viewer")]
    Viewer,
    #[sqlx(rename = "developer")]
    Developer,
    #[sqlx(rename = "admin")]
    Admin,
    #[sqlx(rename = "owner")]
    Owner,
}

impl Role {
    /// A role satisfies a requirement if it is at least as privileged.
    pub fn satisfies(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Role::Viewer => 0,
            Role::Developer => 1,
            Role::Admin => 2,
            Role::Owner => 3,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Viewer => "viewer",
            Role::Developer => "developer",
            Role::Admin => "admin",
            Role::Owner => "owner",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProjectMember {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum ProjectStatus {
    Active,
    Deleting,
    Terminated,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectStatus::Active => "Active",
            ProjectStatus::Deleting => "Deleting",
            ProjectStatus::Terminated => "Terminated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Project {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Environment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub default_namespace: String,
    pub variables: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tagged variant value object. `auto` resolves at build time by
/// file-presence rules in the worker, never in the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildConfig {
    Dockerfile {
        #[serde(default = "default_dockerfile_path")]
        path: String,
        #[serde(default = "default_context")]
        context: String,
        #[serde(default)]
        build_args: std::collections::BTreeMap<String, String>,
        target: Option<String>,
    },
    Buildpack {
        builder: String,
    },
    Function {
        runtime: FunctionRuntime,
        handler: String,
    },
    Auto,
}

fn default_dockerfile_path() -> String {
    "Dockerfile".into()
}
fn default_context() -> String {
    ".".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionRuntime {
    Go,
    Python,
    Node,
    Rust,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub path: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpu_millicores: u32,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub port: u16,
    pub replicas: u32,
    pub resource_requests: ResourceSpec,
    pub resource_limits: ResourceSpec,
    pub health_check: HealthCheck,
    pub autoscale_min: Option<u32>,
    pub autoscale_max: Option<u32>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Service {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub git_repo_url: String,
    pub git_default_branch: String,
    #[sqlx(json)]
    pub build_config: serde_json::Value,
    #[sqlx(json)]
    pub runtime_config: serde_json::Value,
    pub custom_domains: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn build_config(&self) -> anyhow::Result<BuildConfig> {
        Ok(serde_json::from_value(self.build_config.clone())?)
    }

    pub fn runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        Ok(serde_json::from_value(self.runtime_config.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum ReleaseStatus {
    Pending,
    Building,
    Ready,
    Failed,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReleaseStatus::Pending => "pending",
            ReleaseStatus::Building => "building",
            ReleaseStatus::Ready => "ready",
            ReleaseStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Release {
    pub id: Uuid,
    pub service_id: Uuid,
    pub git_sha: String,
    pub git_branch: Option<String>,
    pub status: ReleaseStatus,
    pub image_uri: Option<String>,
    pub image_digest: Option<String>,
    pub image_size_bytes: Option<i64>,
    pub sbom: Option<serde_json::Value>,
    pub sbom_format: Option<String>,
    pub signature_ref: Option<String>,
    pub build_duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum BuildJobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Cancelling,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BuildJob {
    pub id: Uuid,
    pub release_id: Uuid,
    pub service_id: Uuid,
    pub project_id: Uuid,
    pub git_repo_url: String,
    pub git_branch: Option<String>,
    pub git_sha: String,
    #[sqlx(json)]
    pub build_config: serde_json::Value,
    pub timeout_secs: i64,
    pub priority: i32,
    pub status: BuildJobStatus,
    pub leased_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Internal superset of the API-observable four-value lifecycle
/// (`pending, deploying, running, failed, stopped`), broken out into the
/// finer-grained states the reconciler and domain layer actually track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Running,
    Degraded,
    Terminating,
    Stopped,
    Superseded,
    Failed,
    Cancelling,
    Cancelled,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum ObservedHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Deployment {
    pub id: Uuid,
    pub service_id: Uuid,
    pub environment_id: Uuid,
    pub release_id: Uuid,
    pub status: DeploymentStatus,
    pub observed_health: ObservedHealth,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub superseded_by: Option<Uuid>,
    pub rollback_of: Option<Uuid>,
    pub annotations: serde_json::Value,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn is_current(&self) -> bool {
        self.superseded_by.is_none()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub outcome: String,
    pub request_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub revoked: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_satisfies_is_monotonic() {
        assert!(Role::Owner.satisfies(Role::Viewer));
        assert!(Role::Admin.satisfies(Role::Developer));
        assert!(!Role::Viewer.satisfies(Role::Developer));
        assert!(!Role::Developer.satisfies(Role::Admin));
    }

    #[test]
    fn build_config_round_trips_through_json() {
        let cfg = BuildConfig::Dockerfile {
            path: "Dockerfile".into(),
            context: ".".into(),
            build_args: Default::default(),
            target: None,
        };
        let value = serde_json::to_value(&cfg).unwrap();
        let back: BuildConfig = serde_json::from_value(value).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn auto_build_config_has_no_fields() {
        let value = serde_json::to_value(BuildConfig::Auto).unwrap();
        assert_eq!(value, serde_json::json!({"type": "auto"}));
    }
}
