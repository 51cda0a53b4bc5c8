use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::auth::middleware::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/builds/{job_id}/logs/stream", get(build_log_stream))
        .route("/v1/services/{service_id}/logs", get(service_logs))
}

/// Replays the job's ring buffer first, then forwards every subsequent line
/// broadcast by the running build — a subscriber that connects mid-build
/// sees the same transcript one connected at the start would have.
async fn build_log_stream(State(state): State<AppState>, _ctx: AuthContext, Path(job_id): Path<Uuid>, ws: WebSocketUpgrade) -> Response {
    let stream = state.build_queue.stream_for(job_id);
    ws.on_upgrade(move |socket| stream_build_logs(socket, stream))
}

async fn stream_build_logs(socket: WebSocket, stream: std::sync::Arc<crate::build::log_stream::JobLogStream>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = stream.subscribe();

    for line in stream.backlog() {
        if sender.send(Message::Text(serde_json::to_string(&line).unwrap_or_default().into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            line = rx.recv() => {
                match line {
                    Ok(line) => {
                        if sender.send(Message::Text(serde_json::to_string(&line).unwrap_or_default().into())).await.is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        stream.note_slow_consumer();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            msg = receiver.next() => {
                if msg.is_none() {
                    return;
                }
            }
        }
    }
}

/// One-shot fetch of the current pod's logs for a deployed service — not a
/// live tail. Live tailing would need the same ring-buffer/broadcast shape
/// as build logs; runtime pods don't have one yet.
#[cfg(feature = "k8s")]
async fn service_logs(State(state): State<AppState>, _ctx: AuthContext, Path(service_id): Path<Uuid>) -> ApiResult<String> {
    use k8s_openapi::api::core::v1::Pod;
    use kube::api::{Api, ListParams};

    let service = crate::db::services::find_by_id(&state.db_pool, service_id).await?.ok_or_else(|| crate::error::ApiError::not_found("service not found"))?;
    let deployment = find_any_current_deployment(&state, service_id, service.project_id).await?;

    let client = kube::Client::try_default().await.map_err(|e| crate::error::ApiError::internal_anyhow(e.into()))?;
    let environment = crate::db::environments::find_by_id(&state.db_pool, deployment.environment_id).await?.ok_or_else(|| crate::error::ApiError::not_found("environment not found"))?;
    let project = crate::db::projects::find_by_id(&state.db_pool, service.project_id).await?.ok_or_else(|| crate::error::ApiError::not_found("project not found"))?;
    let namespace = crate::reconciler::desired::namespace_name(&project, &environment);

    let pods: Api<Pod> = Api::namespaced(client, &namespace);
    let lp = ListParams::default().labels(&format!("app={}", service.name));
    let list = pods.list(&lp).await.map_err(|e| crate::error::ApiError::internal_anyhow(e.into()))?;
    let pod_name = list.items.into_iter().next().and_then(|p| p.metadata.name).ok_or_else(|| crate::error::ApiError::not_found("no running pod for this service"))?;

    pods.logs(&pod_name, &Default::default()).await.map_err(|e| crate::error::ApiError::internal_anyhow(e.into()))
}

/// Services aren't scoped to a single environment in the request path, so
/// this checks every environment in the project for a current deployment.
#[cfg(feature = "k8s")]
async fn find_any_current_deployment(state: &AppState, service_id: Uuid, project_id: Uuid) -> ApiResult<crate::db::models::Deployment> {
    let environments = crate::db::environments::list_for_project(&state.db_pool, project_id).await?;
    for environment in environments {
        if let Some(deployment) = crate::db::deployments::find_current(&state.db_pool, service_id, environment.id).await? {
            return Ok(deployment);
        }
    }
    Err(crate::error::ApiError::not_found("no current deployment for this service"))
}

#[cfg(not(feature = "k8s"))]
async fn service_logs() -> ApiResult<String> {
    Err(crate::error::ApiError::internal_anyhow(anyhow::anyhow!("service log fetch requires the k8s feature")))
}
