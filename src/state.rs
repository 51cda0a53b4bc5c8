use anyhow::{Context, Result};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::jwt::{ExternalJwtValidator, JwtValidator, LocalKeyPair};
use crate::audit_writer::AuditWriter;
use crate::build::registry::{self, RegistryProvider};
use crate::cache::Cache;
use crate::settings::{AuthMode, Settings};

/// Minimal state shared by the background controllers (build dispatcher,
/// reconciler, project lifecycle). No auth/HTTP plumbing.
#[derive(Clone)]
pub struct ControllerState {
    pub db_pool: PgPool,
    pub cache: Cache,
    pub registry_provider: Option<Arc<dyn RegistryProvider>>,
    pub settings: Arc<Settings>,
}

impl ControllerState {
    pub async fn new(settings: Arc<Settings>, db_pool: PgPool, cache: Cache) -> Result<Self> {
        let registry_provider = registry::build_provider(&settings).await;
        Ok(Self { db_pool, cache, registry_provider, settings })
    }
}

/// Full state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub cache: Cache,
    pub jwt_validator: Arc<JwtValidator>,
    pub auth_issuer: String,
    pub auth_audience: String,
    pub admin_users: Arc<Vec<String>>,
    pub server_settings: Arc<crate::settings::ServerSettings>,
    pub registry_provider: Option<Arc<dyn RegistryProvider>>,
    pub audit_writer: AuditWriter,
    pub build_queue: Arc<crate::build::dispatcher::BuildQueueHandle>,
    pub build_settings: Arc<crate::settings::BuildSettings>,
    pub reconcile_queue: Arc<crate::reconciler::ReconcileQueue>,
}

impl AppState {
    pub async fn new(
        settings: Arc<Settings>,
        db_pool: PgPool,
        build_queue: Arc<crate::build::dispatcher::BuildQueueHandle>,
        reconcile_queue: Arc<crate::reconciler::ReconcileQueue>,
    ) -> Result<Self> {
        let cache = Cache::connect(&settings.redis.connection_url())
            .await
            .context("failed to connect to redis")?;

        let auth_issuer = settings.server.public_url.clone();
        let auth_audience = "enclii-api".to_string();

        let jwt_validator = Arc::new(match settings.auth.auth_mode {
            AuthMode::Local => JwtValidator::Local(Arc::new(LocalKeyPair::generate()?)),
            AuthMode::Oidc => {
                let jwks_url = settings
                    .auth
                    .external_jwks_url
                    .clone()
                    .context("external_jwks_url required for oidc auth mode")?;
                let issuer = settings
                    .auth
                    .external_issuer
                    .clone()
                    .context("external_issuer required for oidc auth mode")?;
                JwtValidator::External(Arc::new(ExternalJwtValidator::new(jwks_url, issuer, auth_audience.clone())))
            }
        });

        let registry_provider = registry::build_provider(&settings).await;

        let audit_writer = AuditWriter::spawn(db_pool.clone(), PathBuf::from("./audit-fallback.ndjson"));

        Ok(Self {
            db_pool,
            cache,
            jwt_validator,
            auth_issuer,
            auth_audience,
            admin_users: Arc::new(settings.auth.admin_users.clone()),
            server_settings: Arc::new(settings.server.clone()),
            registry_provider,
            audit_writer,
            build_queue,
            build_settings: Arc::new(settings.build.clone()),
            reconcile_queue,
        })
    }
}
