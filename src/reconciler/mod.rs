pub mod apply;
pub mod desired;
pub mod rollback;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kube::Client;
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::db::models::{Deployment, DeploymentStatus, ObservedHealth};

/// A (service, environment) pair identifies one reconcile target. Every
/// object the reconciler owns for a Deployment is scoped to this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReconcileKey {
    pub service_id: Uuid,
    pub environment_id: Uuid,
}

/// Coalesces wake-ups: a key already pending in the channel does not need a
/// second send, and a key already running picks up the newest request once
/// its in-flight reconcile finishes rather than queuing one run per wake-up.
pub struct ReconcileQueue {
    tx: mpsc::Sender<ReconcileKey>,
    pending: Arc<Mutex<HashMap<ReconcileKey, ()>>>,
}

impl ReconcileQueue {
    pub fn new(tx: mpsc::Sender<ReconcileKey>, pending: Arc<Mutex<HashMap<ReconcileKey, ()>>>) -> Self {
        Self { tx, pending }
    }

    pub async fn request(&self, key: ReconcileKey) {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&key) {
            return;
        }
        pending.insert(key, ());
        drop(pending);
        // Channel is sized generously; if it's ever full the reconciler is
        // badly backed up and the caller should not block the request path.
        let _ = self.tx.try_send(key);
    }
}

pub struct Reconciler {
    pool: PgPool,
    client: Option<Client>,
    ingress_class: String,
    tls_secret_name: Option<String>,
}

const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

impl Reconciler {
    pub fn new(pool: PgPool, client: Option<Client>, ingress_class: String, tls_secret_name: Option<String>) -> Self {
        Self { pool, client, ingress_class, tls_secret_name }
    }

    /// Spawns the queue-draining task and returns a handle callers use to
    /// request reconciles. At most one reconcile per key runs at a time;
    /// a fixed pool of shard workers drains the shared channel so unrelated
    /// keys still make progress while one key retries.
    pub fn spawn(self: Arc<Self>, shards: usize) -> ReconcileQueue {
        let (tx, rx) = mpsc::channel::<ReconcileKey>(1024);
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(Mutex::new(HashMap::new()));

        for shard in 0..shards.max(1) {
            let reconciler = self.clone();
            let rx = rx.clone();
            let pending = pending.clone();
            tokio::spawn(async move {
                loop {
                    let key = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(key) = key else { break };
                    pending.lock().await.remove(&key);
                    tracing::debug!(shard, service_id = %key.service_id, environment_id = %key.environment_id, "reconcile starting");
                    if let Err(err) = reconciler.reconcile_with_retry(key).await {
                        tracing::error!(service_id = %key.service_id, environment_id = %key.environment_id, error = %err, "reconcile failed permanently");
                    }
                }
            });
        }

        ReconcileQueue::new(tx, pending)
    }

    async fn reconcile_with_retry(&self, key: ReconcileKey) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let started = std::time::Instant::now();
            let outcome = self.reconcile_once(key).await;
            match outcome {
                Ok(()) => {
                    crate::metrics::RECONCILE_DURATION_SECONDS.with_label_values(&["success"]).observe(started.elapsed().as_secs_f64());
                    return Ok(());
                }
                Err(err) => {
                    crate::metrics::RECONCILE_DURATION_SECONDS.with_label_values(&["error"]).observe(started.elapsed().as_secs_f64());
                    let transient = err.downcast_ref::<kube::Error>().map(apply::is_transient).unwrap_or(false);
                    attempt += 1;
                    if !transient || attempt >= MAX_RETRY_ATTEMPTS {
                        if let Some(current) = crate::db::deployments::find_current(&self.pool, key.service_id, key.environment_id).await.ok().flatten() {
                            let _ = crate::db::deployments::update_status(&self.pool, current.id, DeploymentStatus::Failed).await;
                        }
                        return Err(err);
                    }
                    let backoff = BASE_BACKOFF * 2u32.pow(attempt - 1);
                    tracing::warn!(service_id = %key.service_id, environment_id = %key.environment_id, attempt, ?backoff, error = %err, "transient reconcile error, retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn reconcile_once(&self, key: ReconcileKey) -> Result<()> {
        let client = self.client.as_ref().context("reconciler has no cluster client configured")?;

        let mut deployment = crate::db::deployments::find_current(&self.pool, key.service_id, key.environment_id)
            .await?
            .context("no current deployment for this key")?;

        if deployment.status == DeploymentStatus::Pending {
            deployment = crate::db::deployments::update_status(&self.pool, deployment.id, DeploymentStatus::Deploying).await?;
        }
        let service = crate::db::services::find_by_id(&self.pool, key.service_id).await?.context("service not found")?;
        let environment = crate::db::environments::find_by_id(&self.pool, key.environment_id).await?.context("environment not found")?;
        let project = crate::db::projects::find_by_id(&self.pool, service.project_id).await?.context("project not found")?;
        let release = crate::db::releases::find_by_id(&self.pool, deployment.release_id).await?.context("release not found")?;
        let runtime = service.runtime_config()?;

        let namespace = desired::namespace_name(&project, &environment);
        let resolved_env = resolve_env(&environment, &service)?;

        let ns_obj = desired::desired_namespace(&project, &environment, &desired::labels(&service, &deployment));
        apply::apply_namespace(client, &ns_obj).await?;

        if deployment.rollback_of.is_some() && release.image_uri.is_none() {
            let (_, image) = rollback::resolve_prior_image(
                &self.pool,
                Some(client),
                &namespace,
                &desired::deployment_name(&service),
                key.service_id,
                key.environment_id,
                deployment.id,
            )
            .await
            .map_err(|e| anyhow::anyhow!("{}", e.message))?;
            let mut release = release.clone();
            release.image_uri = Some(image);
            self.apply_workload(client, &project, &environment, &service, &deployment, &release, &runtime, resolved_env).await?;
        } else {
            self.apply_workload(client, &project, &environment, &service, &deployment, &release, &runtime, resolved_env).await?;
        }

        self.observe_status(client, &namespace, &service, &deployment).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_workload(
        &self,
        client: &Client,
        project: &crate::db::models::Project,
        environment: &crate::db::models::Environment,
        service: &crate::db::models::Service,
        deployment: &Deployment,
        release: &crate::db::models::Release,
        runtime: &crate::db::models::RuntimeConfig,
        resolved_env: Vec<(String, String)>,
    ) -> Result<()> {
        let namespace = desired::namespace_name(project, environment);
        let desired_deployment = desired::desired_deployment(project, environment, service, deployment, release, runtime, resolved_env)?;
        apply::apply_deployment(client, &namespace, &desired_deployment).await?;

        let desired_service = desired::desired_service(project, environment, service, deployment, runtime);
        apply::apply_service(client, &namespace, &desired_service).await?;

        if let Some(hostname) = service.custom_domains.first() {
            let desired_ingress = desired::desired_ingress(project, environment, service, deployment, hostname, &self.ingress_class, self.tls_secret_name.as_deref());
            apply::apply_ingress(client, &namespace, &desired_ingress).await?;
        }

        Ok(())
    }

    async fn observe_status(&self, client: &Client, namespace: &str, service: &crate::db::models::Service, deployment: &Deployment) -> Result<()> {
        use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
        use kube::api::Api;

        let api: Api<K8sDeployment> = Api::namespaced(client.clone(), namespace);
        let current = api.get(&desired::deployment_name(service)).await?;
        let status = current.status.unwrap_or_default();
        let (health, ready) = apply::compute_observed_health(&status, deployment.desired_replicas);

        let observed_status = match health {
            ObservedHealth::Healthy => DeploymentStatus::Running,
            ObservedHealth::Unhealthy => DeploymentStatus::Degraded,
            ObservedHealth::Unknown => deployment.status,
        };

        // A deployment already moved to a terminal or in-flight-terminating
        // state by the domain layer shouldn't be bounced back to Running by
        // a stale health read racing the teardown.
        let mapped_status = if crate::domain::state_machine::is_valid_transition(&deployment.status, &observed_status) {
            observed_status
        } else {
            deployment.status
        };

        crate::db::deployments::update_observed(&self.pool, deployment.id, mapped_status, health, ready).await?;
        crate::metrics::DEPLOYMENT_REPLICAS.with_label_values(&[&service.name, namespace]).set(ready as f64);
        Ok(())
    }
}

fn resolve_env(environment: &crate::db::models::Environment, _service: &crate::db::models::Service) -> Result<Vec<(String, String)>> {
    let obj = environment.variables.as_object().context("environment variables must be a JSON object")?;
    Ok(obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_environment(variables: serde_json::Value) -> crate::db::models::Environment {
        crate::db::models::Environment {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "production".into(),
            default_namespace: "enclii-production".into(),
            variables,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_service() -> crate::db::models::Service {
        crate::db::models::Service {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            name: "api".into(),
            git_repo_url: "https://example.invalid/api.git".into(),
            git_default_branch: "main".into(),
            build_config: serde_json::json!({ "type": "auto" }),
            runtime_config: serde_json::json!({}),
            custom_domains: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn resolve_env_keeps_only_string_values() {
        let environment = sample_environment(serde_json::json!({
            "LOG_LEVEL": "info",
            "PORT": 8080,
            "FEATURE_FLAG": true,
        }));
        let mut resolved = resolve_env(&environment, &sample_service()).unwrap();
        resolved.sort();
        assert_eq!(resolved, vec![("LOG_LEVEL".to_string(), "info".to_string())]);
    }

    #[test]
    fn resolve_env_rejects_a_non_object() {
        let environment = sample_environment(serde_json::json!(["not", "an", "object"]));
        assert!(resolve_env(&environment, &sample_service()).is_err());
    }

    #[tokio::test]
    async fn queue_coalesces_repeated_requests_for_the_same_key() {
        let (tx, mut rx) = mpsc::channel(8);
        let pending = Arc::new(Mutex::new(HashMap::new()));
        let queue = ReconcileQueue::new(tx, pending);
        let key = ReconcileKey { service_id: Uuid::new_v4(), environment_id: Uuid::new_v4() };

        queue.request(key).await;
        queue.request(key).await;
        queue.request(key).await;

        assert_eq!(rx.recv().await, Some(key));
        // The coalescing map only drops the entry once a worker dequeues it,
        // so a second burst before that happens is still a no-op here.
        assert!(rx.try_recv().is_err());
    }
}
