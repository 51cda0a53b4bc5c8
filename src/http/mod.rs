pub mod deployments;
pub mod environments;
pub mod health;
pub mod logs;
pub mod projects;
pub mod releases;
pub mod services;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

pub fn public_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(webhooks::routes())
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .merge(projects::routes())
        .merge(environments::routes())
        .merge(services::routes())
        .merge(releases::routes())
        .merge(deployments::routes())
        .merge(logs::routes())
}

/// `request_id` is generated once per request by the tracing layer; route
/// handlers that don't run behind it (webhooks, health) mint their own.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
