use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::api::core::v1::{Namespace, Service as K8sService};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use crate::db::models::ObservedHealth;

const FIELD_MANAGER: &str = "enclii-reconciler";

/// Server-side apply create-or-update: a single PATCH with `force` owns the
/// fields enclii manages without clobbering fields other controllers set.
/// Never deletes; explicit cleanup is a separate path (project termination).
pub async fn apply_namespace(client: &Client, ns: &Namespace) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let name = ns.metadata.name.as_deref().context("namespace manifest missing name")?;
    apply(&api, name, ns).await
}

pub async fn apply_deployment(client: &Client, namespace: &str, deployment: &K8sDeployment) -> Result<()> {
    let api: Api<K8sDeployment> = Api::namespaced(client.clone(), namespace);
    let name = deployment.metadata.name.as_deref().context("deployment manifest missing name")?;
    apply(&api, name, deployment).await
}

pub async fn apply_service(client: &Client, namespace: &str, service: &K8sService) -> Result<()> {
    let api: Api<K8sService> = Api::namespaced(client.clone(), namespace);
    let name = service.metadata.name.as_deref().context("service manifest missing name")?;
    apply(&api, name, service).await
}

pub async fn apply_ingress(client: &Client, namespace: &str, ingress: &Ingress) -> Result<()> {
    let api: Api<Ingress> = Api::namespaced(client.clone(), namespace);
    let name = ingress.metadata.name.as_deref().context("ingress manifest missing name")?;
    apply(&api, name, ingress).await
}

async fn apply<K>(api: &Api<K>, name: &str, object: &K) -> Result<()>
where
    K: kube::Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &params, &Patch::Apply(object)).await.with_context(|| format!("failed to apply {name}"))?;
    Ok(())
}

/// (ready == desired && generation observed) → healthy; (0 < ready < desired)
/// → unhealthy (the caller maps this to `DeploymentStatus::Degraded`); else
/// pending.
pub fn compute_observed_health(status: &k8s_openapi::api::apps::v1::DeploymentStatus, desired_replicas: i32) -> (ObservedHealth, i32) {
    let ready = status.ready_replicas.unwrap_or(0);
    let generation_observed = status.observed_generation.is_some();

    let health = if ready == desired_replicas && desired_replicas > 0 && generation_observed {
        ObservedHealth::Healthy
    } else if ready > 0 && ready < desired_replicas {
        ObservedHealth::Unhealthy
    } else {
        ObservedHealth::Unknown
    };

    (health, ready)
}

/// Classifies an API error so the reconciler retries transient failures
/// with backoff and gives up immediately on permanent ones.
pub fn is_transient(error: &kube::Error) -> bool {
    match error {
        kube::Error::Api(resp) => matches!(resp.code, 409 | 429 | 500 | 502 | 503 | 504),
        kube::Error::Service(_) | kube::Error::HyperError(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    #[test]
    fn all_replicas_ready_is_healthy() {
        let status = DeploymentStatus { ready_replicas: Some(3), observed_generation: Some(1), ..Default::default() };
        let (health, ready) = compute_observed_health(&status, 3);
        assert_eq!(health, ObservedHealth::Healthy);
        assert_eq!(ready, 3);
    }

    #[test]
    fn partial_readiness_is_unhealthy() {
        let status = DeploymentStatus { ready_replicas: Some(1), observed_generation: Some(1), ..Default::default() };
        let (health, _) = compute_observed_health(&status, 3);
        assert_eq!(health, ObservedHealth::Unhealthy);
    }

    #[test]
    fn no_ready_replicas_is_unknown() {
        let status = DeploymentStatus { ready_replicas: None, observed_generation: None, ..Default::default() };
        let (health, _) = compute_observed_health(&status, 3);
        assert_eq!(health, ObservedHealth::Unknown);
    }
}
