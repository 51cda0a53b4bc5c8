use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/git", post(git_push))
}

#[derive(Deserialize)]
struct GitPushPayload {
    repository: RepositoryRef,
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
}

#[derive(Deserialize)]
struct RepositoryRef {
    clone_url: String,
}

/// GitHub/GitLab-style push webhook. The signature covers the raw request
/// body, so it must be verified before the body is parsed as JSON — a
/// forged payload that merely re-serializes to the same bytes would still
/// need to pass this check.
async fn git_push(State(state): State<AppState>, headers: HeaderMap, body: axum::body::Bytes) -> ApiResult<Json<serde_json::Value>> {
    let secret = state
        .server_settings
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::internal_anyhow(anyhow::anyhow!("no webhook secret configured")))?;

    verify_signature(secret, &headers, &body)?;

    let payload: GitPushPayload = serde_json::from_slice(&body).map_err(|e| ApiError::validation("body", format!("invalid webhook payload: {e}")))?;

    let branch = payload
        .git_ref
        .strip_prefix("refs/heads/")
        .ok_or_else(|| ApiError::unprocessable("only branch push events are handled"))?;

    let services = crate::db::services::list_by_git_repo_url(&state.db_pool, &payload.repository.clone_url)
        .await
        .map_err(ApiError::internal_anyhow)?;

    let mut triggered = Vec::new();
    for service in &services {
        if service.git_default_branch != branch {
            continue;
        }
        let request_id = super::new_request_id();
        let (job, is_new) = crate::domain::release::trigger_build(
            &state.db_pool,
            &state.audit_writer,
            uuid::Uuid::nil(),
            &request_id,
            service.id,
            &payload.after,
            Some(branch),
            0,
            state.build_settings.build_timeout_secs as i64,
        )
        .await?;
        triggered.push(serde_json::json!({ "service_id": service.id, "job_id": job.id, "enqueued": is_new }));
    }

    Ok(Json(serde_json::json!({ "triggered": triggered })))
}

fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> ApiResult<()> {
    let signature_header = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthenticated("missing X-Hub-Signature-256 header"))?;

    let expected_hex = signature_header.strip_prefix("sha256=").unwrap_or(signature_header);
    let expected = hex::decode(expected_hex).map_err(|_| ApiError::unauthenticated("malformed signature header"))?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| ApiError::internal_anyhow(e.into()))?;
    mac.update(body);

    mac.verify_slice(&expected).map_err(|_| ApiError::unauthenticated("signature mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert("X-Hub-Signature-256", HeaderValue::from_str(&format!("sha256={sig}")).unwrap());
        headers
    }

    #[test]
    fn accepts_a_correctly_signed_body() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let headers = signed_headers("s3cret", body);
        assert!(verify_signature("s3cret", &headers, body).is_ok());
    }

    #[test]
    fn rejects_a_signature_for_a_different_body() {
        let headers = signed_headers("s3cret", b"original");
        assert!(verify_signature("s3cret", &headers, b"tampered").is_err());
    }

    #[test]
    fn rejects_the_wrong_secret() {
        let body = b"payload";
        let headers = signed_headers("s3cret", body);
        assert!(verify_signature("different", &headers, body).is_err());
    }

    #[test]
    fn rejects_a_missing_header() {
        let headers = HeaderMap::new();
        assert!(verify_signature("s3cret", &headers, b"payload").is_err());
    }
}
