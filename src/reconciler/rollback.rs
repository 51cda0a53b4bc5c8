use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::ReplicaSet;
use kube::api::{Api, ListParams};
use kube::Client;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Resolves the image to roll back to. The store is authoritative: the most
/// recent prior `running` Deployment for (service, environment) names a
/// Release with an `image_uri`. Only when that row is missing or the
/// release's `image_uri` is empty does this fall back to the cluster's own
/// ReplicaSet history — never a placeholder string.
pub async fn resolve_prior_image(pool: &PgPool, client: Option<&Client>, namespace: &str, deployment_k8s_name: &str, service_id: Uuid, environment_id: Uuid, current_deployment_id: Uuid) -> ApiResult<(Uuid, String)> {
    if let Some(prior) = crate::db::deployments::find_prior_running(pool, service_id, environment_id, current_deployment_id)
        .await
        .map_err(ApiError::internal_anyhow)?
    {
        if let Some(release) = crate::db::releases::find_by_id(pool, prior.release_id).await.map_err(ApiError::internal_anyhow)? {
            if let Some(image_uri) = release.image_uri {
                return Ok((prior.release_id, image_uri));
            }
        }
    }

    match client {
        Some(client) => resolve_from_replicaset_history(client, namespace, deployment_k8s_name, current_deployment_id)
            .await
            .map_err(ApiError::internal_anyhow),
        None => Err(ApiError::not_found("no previous revision available to roll back to").with_field("deployment_id")),
    }
}

async fn resolve_from_replicaset_history(client: &Client, namespace: &str, deployment_name: &str, current_uid: Uuid) -> Result<(Uuid, String)> {
    let api: Api<ReplicaSet> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("app={deployment_name}"));
    let list = api.list(&lp).await.context("failed to list ReplicaSet history")?;

    let mut candidates: Vec<(i64, ReplicaSet)> = list
        .items
        .into_iter()
        .filter(|rs| {
            rs.metadata
                .owner_references
                .as_ref()
                .map(|owners| !owners.iter().any(|o| o.uid == current_uid.to_string()))
                .unwrap_or(true)
        })
        .filter_map(|rs| {
            let revision = rs
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get("deployment.kubernetes.io/revision"))
                .and_then(|v| v.parse::<i64>().ok())?;
            Some((revision, rs))
        })
        .collect();

    candidates.sort_by_key(|(rev, _)| -*rev);

    let (_, newest) = candidates.into_iter().next().context("no prior ReplicaSet revision found")?;
    let image = newest
        .spec
        .and_then(|s| s.template)
        .and_then(|t| t.spec)
        .and_then(|s| s.containers.into_iter().next())
        .and_then(|c| c.image)
        .context("prior ReplicaSet has no container image")?;

    // ReplicaSets don't carry our release id; the caller only needs the image
    // reference in this fallback path and records release_id as nil.
    Ok((Uuid::nil(), image))
}
