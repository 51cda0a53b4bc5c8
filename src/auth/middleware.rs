use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::auth::api_key;
use crate::db::models::Role;
use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated principal, attached to request extensions by
/// `auth_middleware` and read by handlers through an extractor.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Option<Uuid>,
    pub is_admin: bool,
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = if let Some(token) = extract_bearer_token(&headers) {
        authenticate_bearer(&state, &token).await?
    } else if let Some(key) = extract_api_key(&headers) {
        authenticate_api_key(&state, &key).await?
    } else {
        return Err(ApiError::unauthenticated("missing Authorization or X-API-Key header"));
    };

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

async fn authenticate_bearer(state: &AppState, token: &str) -> Result<AuthContext, ApiError> {
    let claims = state
        .jwt_validator
        .validate(token, &state.auth_audience, &state.auth_issuer)
        .await
        .map_err(|e| {
            tracing::warn!(error = ?e, "bearer token rejected");
            ApiError::unauthenticated("invalid or expired token")
        })?;

    if state
        .cache
        .is_session_revoked(claims.sid)
        .await
        .unwrap_or(false)
    {
        return Err(ApiError::unauthenticated("session has been revoked"));
    }

    let user = crate::db::users::find_or_create(&state.db_pool, &claims.email)
        .await
        .internal_err_api()?;

    let is_admin = state.admin_users.iter().any(|e| e == &claims.email);

    Ok(AuthContext {
        user_id: user.id,
        email: user.email,
        session_id: Some(claims.sid),
        is_admin,
    })
}

async fn authenticate_api_key(state: &AppState, key: &str) -> Result<AuthContext, ApiError> {
    let key_hash = api_key::hash(key);
    let record = crate::db::api_keys::find_by_hash(&state.db_pool, &key_hash)
        .await
        .internal_err_api()?
        .ok_or_else(|| ApiError::unauthenticated("unknown or revoked API key"))?;

    if !api_key::verify(key, &record.key_hash) {
        return Err(ApiError::unauthenticated("unknown or revoked API key"));
    }

    let user = crate::db::users::find_by_id(&state.db_pool, record.user_id)
        .await
        .internal_err_api()?
        .ok_or_else(|| ApiError::unauthenticated("API key owner no longer exists"))?;

    Ok(AuthContext { user_id: user.id, email: user.email, session_id: None, is_admin: false })
}

/// Looks up the caller's role for `project_id` and rejects with 403 if it
/// doesn't satisfy `required`. Admins (configured via `auth.admin_users`)
/// always satisfy every role check.
pub async fn require_role(
    state: &AppState,
    ctx: &AuthContext,
    project_id: Uuid,
    required: Role,
) -> Result<(), ApiError> {
    if ctx.is_admin {
        return Ok(());
    }
    let role = crate::db::users::role_in_project(&state.db_pool, ctx.user_id, project_id)
        .await
        .internal_err_api()?
        .ok_or_else(|| ApiError::forbidden("not a member of this project"))?;

    if !role.satisfies(required) {
        return Err(ApiError::forbidden(format!(
            "role '{role}' does not satisfy required role '{required}'"
        )));
    }
    Ok(())
}

trait InternalErrApi<T> {
    fn internal_err_api(self) -> Result<T, ApiError>;
}

impl<T> InternalErrApi<T> for anyhow::Result<T> {
    fn internal_err_api(self) -> Result<T, ApiError> {
        self.map_err(ApiError::internal_anyhow)
    }
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| ApiError::unauthenticated("request was not authenticated"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi".to_string()));
    }

    #[test]
    fn missing_header_yields_none() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }

    #[test]
    fn extracts_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", HeaderValue::from_static("encl_abc"));
        assert_eq!(extract_api_key(&headers), Some("encl_abc".to_string()));
    }
}
