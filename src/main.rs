use anyhow::{Context, Result};
use axum::{middleware, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod adapters;
mod audit_writer;
mod auth;
mod build;
mod cache;
mod db;
mod domain;
mod error;
mod http;
mod metrics;
mod reconciler;
mod security;
mod settings;
mod state;

use settings::Settings;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Arc::new(Settings::new().context("failed to load configuration")?);
    init_tracing(&settings.server.log_level, &settings.server.log_format);

    rustls::crypto::ring::default_provider().install_default().ok();

    let build_queue = Arc::new(build::dispatcher::BuildQueueHandle::new());

    let kube_client = build_kube_client(&settings).await;
    if kube_client.is_none() {
        tracing::warn!("no reachable Kubernetes cluster; reconciler and in-cluster builds are disabled");
    }

    let kubernetes_settings = settings.kubernetes.as_ref();
    if kubernetes_settings.is_none() {
        tracing::warn!("no [kubernetes] section configured; using reconciler defaults (ingress class \"nginx\", no TLS secret)");
    }
    let ingress_class = kubernetes_settings.map(|k| k.ingress_class.clone()).unwrap_or_else(|| "nginx".to_string());
    let tls_secret_name = kubernetes_settings.and_then(|k| k.ingress_tls_secret_name.clone());

    let pool = db::connect(&settings.database.url, settings.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    db::run_migrations(&pool).await?;

    let reconciler = Arc::new(reconciler::Reconciler::new(pool.clone(), kube_client.clone(), ingress_class, tls_secret_name));
    let reconcile_queue = Arc::new(reconciler.spawn(4));

    let app_state = AppState::new(settings.clone(), pool, build_queue.clone(), reconcile_queue.clone()).await?;

    spawn_build_dispatcher(&settings, app_state.db_pool.clone(), app_state.registry_provider.clone(), build_queue.clone(), kube_client.clone()).await?;
    spawn_secret_rotation(&settings, app_state.db_pool.clone()).await?;

    let public_routes = Router::new().merge(auth::routes::public_routes()).merge(http::public_routes());

    let protected_routes = Router::new()
        .merge(auth::routes::protected_routes())
        .merge(http::protected_routes())
        .route_layer(middleware::from_fn_with_state(app_state.clone(), auth::middleware::auth_middleware));

    let app = Router::new().nest("/api", public_routes.merge(protected_routes)).with_state(app_state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(RequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(CorsLayer::permissive()),
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!(%addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("HTTP server shutdown complete");

    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_kube_client(settings: &Settings) -> Option<kube::Client> {
    let config = if let Some(path) = settings.kubernetes.as_ref().and_then(|k| k.kubeconfig.as_ref()) {
        kube::Config::from_custom_kubeconfig(
            kube::config::Kubeconfig::read_from(path).ok()?,
            &kube::config::KubeConfigOptions::default(),
        )
        .await
        .ok()?
    } else {
        kube::Config::infer().await.ok()?
    };
    kube::Client::try_from(config).ok()
}

async fn spawn_build_dispatcher(
    settings: &Settings,
    pool: sqlx::PgPool,
    registry: Option<Arc<dyn build::registry::RegistryProvider>>,
    queue: Arc<build::dispatcher::BuildQueueHandle>,
    kube_client: Option<kube::Client>,
) -> Result<()> {
    let git_host: Arc<dyn adapters::git::GitHost> = Arc::new(adapters::git::ProcessGitHost);

    let builder: Arc<dyn build::builder::Builder> = match settings.build.build_mode {
        settings::BuildMode::Worker => {
            let client = kube_client.context("settings.build.build_mode = worker requires a reachable cluster")?;
            Arc::new(build::builder::InClusterBuilder::new(client, "enclii-builds", "paketobuildpacks/builder-jammy-base"))
        }
        settings::BuildMode::InProcess => Arc::new(build::builder::LocalBuilder::new("docker")),
    };

    let dispatcher = Arc::new(build::dispatcher::Dispatcher::new(pool, builder, git_host, registry, settings.build.clone(), queue));
    dispatcher.spawn();
    info!("build dispatcher started");
    Ok(())
}

async fn spawn_secret_rotation(settings: &Settings, pool: sqlx::PgPool) -> Result<()> {
    let encryption: Arc<dyn security::EncryptionProvider> = match &settings.encryption {
        Some(settings::EncryptionSettings::Local { key }) => Arc::new(security::encryption::LocalAesGcmProvider::new(key)?),
        #[cfg(feature = "aws")]
        Some(settings::EncryptionSettings::AwsKms { region, key_id, access_key_id, secret_access_key }) => {
            Arc::new(security::encryption::AwsKmsProvider::new(region.clone(), key_id.clone(), access_key_id.clone(), secret_access_key.clone()).await?)
        }
        #[cfg(not(feature = "aws"))]
        Some(settings::EncryptionSettings::AwsKms { .. }) => {
            anyhow::bail!("encryption.provider = aws-kms requires the aws feature");
        }
        None => {
            tracing::warn!("no [encryption] section configured; secret storage and rotation are disabled");
            return Ok(());
        }
    };

    let store = Arc::new(adapters::secret_store::EncryptedSecretStore::new(pool, encryption));
    tokio::spawn(adapters::secret_store::run_rotation_poller(store, 300));
    info!("secret rotation poller started");
    Ok(())
}

#[derive(Clone, Default)]
struct RequestUuid;

impl MakeRequestId for RequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down gracefully"),
        _ = terminate => info!("received SIGTERM, shutting down gracefully"),
    }
}
