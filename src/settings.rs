use anyhow::{bail, Context, Result};
use config::Config;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_log_format() -> String {
    "json".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_run_mode() -> String {
    "development".into()
}
fn default_max_request_size() -> usize {
    10 * 1024 * 1024
}
fn default_session_ttl_secs() -> u64 {
    3600
}
fn default_rate_limit_per_minute() -> u32 {
    600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub public_url: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub tracing_enabled: bool,
    pub jaeger_endpoint: Option<String>,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// HMAC-SHA256 secret the git webhook's `X-Hub-Signature-256` header is
    /// verified against. `None` disables the webhook route entirely.
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,
}

fn default_db_max_connections() -> u32 {
    25
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    pub password: Option<String>,
    #[serde(default)]
    pub db: i64,
}

fn default_redis_host() -> String {
    "127.0.0.1".into()
}
fn default_redis_port() -> u16 {
    6379
}

impl RedisSettings {
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(pw) => format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Local,
    Oidc,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthSettings {
    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    pub external_jwks_url: Option<String>,
    pub external_issuer: Option<String>,
    #[serde(default = "default_jwt_access_ttl")]
    pub jwt_access_ttl: u64,
    #[serde(default = "default_jwt_refresh_ttl")]
    pub jwt_refresh_ttl: u64,
    #[serde(default)]
    pub admin_users: Vec<String>,
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Local
}
fn default_jwt_access_ttl() -> u64 {
    900
}
fn default_jwt_refresh_ttl() -> u64 {
    2_592_000
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMode {
    InProcess,
    Worker,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildSettings {
    #[serde(default = "default_build_mode")]
    pub build_mode: BuildMode,
    pub worker_url: Option<String>,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_build_concurrency")]
    pub build_concurrency: usize,
    pub cache_repo: Option<String>,
    #[serde(default)]
    pub generate_sbom: bool,
    #[serde(default)]
    pub sign_images: bool,
    pub cosign_key: Option<String>,
    #[serde(default = "default_max_lease_attempts")]
    pub max_lease_attempts: u32,
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
}

fn default_build_mode() -> BuildMode {
    BuildMode::InProcess
}
fn default_build_timeout_secs() -> u64 {
    30 * 60
}
fn default_build_concurrency() -> usize {
    4
}
fn default_max_lease_attempts() -> u32 {
    2
}
fn default_lease_duration_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RegistrySettings {
    Ecr {
        region: String,
        account_id: String,
        #[serde(default = "default_repo_prefix")]
        repo_prefix: String,
        role_arn: Option<String>,
        push_role_arn: Option<String>,
        #[serde(default)]
        auto_remove: bool,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
    #[serde(rename = "oci-client-auth", alias = "docker")]
    OciClientAuth {
        registry_url: String,
        #[serde(default)]
        namespace: String,
        user: Option<String>,
        #[serde(rename = "pass")]
        password: Option<String>,
    },
}

fn default_repo_prefix() -> String {
    "enclii/".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EncryptionSettings {
    #[serde(rename = "aes-gcm-256")]
    Local { key: String },
    #[serde(rename = "aws-kms")]
    AwsKms {
        region: String,
        key_id: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KubernetesSettings {
    pub kubeconfig: Option<String>,
    #[serde(default)]
    pub in_cluster: bool,
    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,
    #[serde(default = "default_namespace_format")]
    pub namespace_format: String,
    #[serde(default)]
    pub namespace_labels: HashMap<String, String>,
    #[serde(default)]
    pub ingress_annotations: HashMap<String, String>,
    pub ingress_tls_secret_name: Option<String>,
    #[serde(default)]
    pub node_selector: HashMap<String, String>,
}

fn default_ingress_class() -> String {
    "nginx".into()
}
fn default_namespace_format() -> String {
    "enclii-{project_slug}".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DnsSettings {
    pub provider: String,
    pub api_token: Option<String>,
    pub account_id: Option<String>,
    pub zone_id: Option<String>,
    pub tunnel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerSettings {
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_termination_interval_secs")]
    pub termination_interval_secs: u64,
    #[serde(default = "default_secret_refresh_interval_secs")]
    pub secret_refresh_interval_secs: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    5
}
fn default_health_check_interval_secs() -> u64 {
    10
}
fn default_termination_interval_secs() -> u64 {
    5
}
fn default_secret_refresh_interval_secs() -> u64 {
    300
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            termination_interval_secs: default_termination_interval_secs(),
            secret_refresh_interval_secs: default_secret_refresh_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub auth: AuthSettings,
    pub build: BuildSettings,
    #[serde(default)]
    pub controller: ControllerSettings,
    pub registry: Option<RegistrySettings>,
    pub encryption: Option<EncryptionSettings>,
    pub kubernetes: Option<KubernetesSettings>,
    pub dns: Option<DnsSettings>,
}

fn validate_format_string(value: &str, placeholders: &[&str], field: &str) -> Result<()> {
    for p in placeholders {
        if !value.contains(&format!("{{{}}}", p)) {
            bail!("{} must contain the {{{}}} placeholder, got: {}", field, p, value);
        }
    }
    Ok(())
}

fn substitute_env_vars_in_string(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref RE: Regex = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    }
    RE.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

fn substitute_env_vars_recursive(value: config::Value) -> config::Value {
    use config::ValueKind;
    let origin = value.origin().map(|s| s.to_string());
    let kind = match value.kind {
        ValueKind::String(s) => ValueKind::String(substitute_env_vars_in_string(&s)),
        ValueKind::Array(items) => {
            ValueKind::Array(items.into_iter().map(substitute_env_vars_recursive).collect())
        }
        ValueKind::Table(map) => ValueKind::Table(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env_vars_recursive(v)))
                .collect(),
        ),
        other => other,
    };
    config::Value::new(origin.as_deref(), kind)
}

impl Settings {
    pub fn new() -> Result<Self> {
        let run_mode = std::env::var("ENCLII_RUN_MODE").unwrap_or_else(|_| default_run_mode());
        let config_dir = std::env::var("ENCLII_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let mut builder = Config::builder();
        builder = builder.add_source(config::File::with_name(&format!("{config_dir}/default")).required(true));
        builder = builder.add_source(
            config::File::with_name(&format!("{config_dir}/{run_mode}")).required(false),
        );
        builder = builder.add_source(config::File::with_name(&format!("{config_dir}/local")).required(false));
        builder = builder.add_source(
            config::Environment::with_prefix("ENCLII")
                .separator("__")
                .try_parsing(true),
        );

        let raw = builder.build().context("failed to assemble configuration layers")?;
        let substituted = substitute_env_vars_recursive(raw.cache.into());
        let mut settings: Settings = substituted
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            settings.database.url = database_url;
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("database.url must not be empty (set ENCLII_DATABASE__URL or DATABASE_URL)");
        }
        if self.auth.auth_mode == AuthMode::Oidc {
            if self.auth.external_jwks_url.is_none() {
                bail!("auth.external_jwks_url is required when auth_mode = \"oidc\"");
            }
            if self.auth.external_issuer.is_none() {
                bail!("auth.external_issuer is required when auth_mode = \"oidc\"");
            }
        }
        if let Some(ref k8s) = self.kubernetes {
            validate_format_string(&k8s.namespace_format, &["project_slug"], "kubernetes.namespace_format")?;
        }
        if let Some(EncryptionSettings::Local { ref key }) = self.encryption {
            if key.trim().is_empty() {
                bail!("encryption.key must not be empty for the local (aes-gcm-256) provider");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_plain_env_var() {
        std::env::set_var("ENCLII_TEST_PLAIN", "value1");
        assert_eq!(substitute_env_vars_in_string("${ENCLII_TEST_PLAIN}"), "value1");
    }

    #[test]
    fn substitutes_with_default_when_missing() {
        std::env::remove_var("ENCLII_TEST_MISSING");
        assert_eq!(
            substitute_env_vars_in_string("${ENCLII_TEST_MISSING:-fallback}"),
            "fallback"
        );
    }

    #[test]
    fn prefers_set_value_over_default() {
        std::env::set_var("ENCLII_TEST_OVERRIDE", "actual");
        assert_eq!(
            substitute_env_vars_in_string("${ENCLII_TEST_OVERRIDE:-fallback}"),
            "actual"
        );
    }

    #[test]
    fn substitutes_multiple_occurrences() {
        std::env::set_var("ENCLII_TEST_A", "a");
        std::env::set_var("ENCLII_TEST_B", "b");
        assert_eq!(
            substitute_env_vars_in_string("${ENCLII_TEST_A}-${ENCLII_TEST_B}"),
            "a-b"
        );
    }

    #[test]
    fn leaves_plain_strings_untouched() {
        assert_eq!(substitute_env_vars_in_string("no placeholders here"), "no placeholders here");
    }

    #[test]
    fn format_string_validation_rejects_missing_placeholder() {
        assert!(validate_format_string("static-namespace", &["project_slug"], "field").is_err());
        assert!(validate_format_string("ns-{project_slug}", &["project_slug"], "field").is_ok());
    }
}
