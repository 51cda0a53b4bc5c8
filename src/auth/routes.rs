use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::auth::jwt::{JwksResponse, JwtValidator};
use crate::auth::middleware::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /v1/auth/jwks.json` — the public key set backing this deployment's
/// self-issued tokens. In `auth_mode = "oidc"` there are no local keys to
/// publish; the route still exists but returns an empty key set, since
/// verification in that mode uses the external IdP's JWKS instead.
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/v1/auth/jwks.json", get(jwks))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new().route("/v1/auth/session", post(revoke_current_session))
}

async fn jwks(State(state): State<AppState>) -> Json<JwksResponse> {
    match state.jwt_validator.as_ref() {
        JwtValidator::Local(keypair) => Json(keypair.jwks()),
        JwtValidator::External(_) => Json(JwksResponse { keys: vec![] }),
    }
}

/// Logs the caller out by revoking the session id carried in their token;
/// a bearer token signed after revocation is unaffected, only this `sid`.
async fn revoke_current_session(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(sid) = ctx.session_id {
        state
            .cache
            .revoke_session(sid, std::time::Duration::from_secs(state.server_settings.session_ttl_secs))
            .await
            .map_err(crate::error::ApiError::internal_anyhow)?;
    }
    Ok(Json(serde_json::json!({ "revoked": true })))
}
