use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::settings::{RegistrySettings, Settings};

/// Temporary credentials scoped to a single repository push, or registry-wide
/// read credentials for digest resolution.
#[derive(Debug, Clone)]
pub struct RegistryCredentials {
    pub registry_url: String,
    pub username: String,
    pub password: String,
    pub expires_in: Option<u64>,
}

#[async_trait]
pub trait RegistryProvider: Send + Sync {
    /// Credentials scoped to pushing into `repository`.
    async fn get_credentials(&self, repository: &str) -> Result<RegistryCredentials>;

    /// Registry-wide pull credentials, used when inspecting a pushed image's
    /// digest. Empty strings mean anonymous pull access.
    async fn get_pull_credentials(&self) -> Result<(String, String)>;

    fn registry_host(&self) -> &str;
    fn registry_url(&self) -> &str;

    fn image_uri(&self, repository: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.registry_url(), repository, tag)
    }
}

/// Relies on the caller having authenticated out-of-band (`docker login` or
/// equivalent); credentials are always empty and the image push happens
/// against whatever is already configured client-side.
pub struct OciClientAuthProvider {
    registry_url: String,
    registry_host: String,
}

impl OciClientAuthProvider {
    pub fn new(registry_url: String, namespace: String) -> Self {
        let registry_host = registry_url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .split('/')
            .next()
            .unwrap_or(&registry_url)
            .to_string();

        let namespace = namespace.trim_end_matches('/');
        let registry_url = if namespace.is_empty() {
            registry_url.trim_end_matches('/').to_string()
        } else {
            format!("{}/{}", registry_url.trim_end_matches('/'), namespace)
        };

        Self { registry_url, registry_host }
    }
}

#[async_trait]
impl RegistryProvider for OciClientAuthProvider {
    async fn get_credentials(&self, repository: &str) -> Result<RegistryCredentials> {
        tracing::debug!(repository, "oci-client-auth provider assumes client-side login");
        Ok(RegistryCredentials {
            registry_url: self.registry_url.clone(),
            username: String::new(),
            password: String::new(),
            expires_in: None,
        })
    }

    async fn get_pull_credentials(&self) -> Result<(String, String)> {
        Ok((String::new(), String::new()))
    }

    fn registry_host(&self) -> &str {
        &self.registry_host
    }

    fn registry_url(&self) -> &str {
        &self.registry_url
    }
}

/// AWS ECR-backed provider. Repository creation is lazy: `get_credentials`
/// creates the repo on first push if it doesn't already exist.
#[cfg(feature = "aws")]
pub struct EcrProvider {
    client: aws_sdk_ecr::Client,
    region: String,
    account_id: String,
    repo_prefix: String,
    registry_host: String,
}

#[cfg(feature = "aws")]
impl EcrProvider {
    pub async fn new(
        region: String,
        account_id: String,
        repo_prefix: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> Result<Self> {
        let aws_config = if let (Some(ak), Some(sk)) = (&access_key_id, &secret_access_key) {
            let creds = aws_sdk_ecr::config::Credentials::new(ak, sk, None, None, "static");
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .credentials_provider(creds)
                .region(aws_config::Region::new(region.clone()))
                .load()
                .await
        } else {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(region.clone()))
                .load()
                .await
        };

        let client = aws_sdk_ecr::Client::new(&aws_config);
        let registry_host = format!("{account_id}.dkr.ecr.{region}.amazonaws.com");

        Ok(Self { client, region, account_id, repo_prefix, registry_host })
    }

    fn repo_name(&self, repository: &str) -> String {
        format!("{}{}", self.repo_prefix, repository)
    }

    async fn ensure_repository(&self, repository: &str) -> Result<()> {
        let repo_name = self.repo_name(repository);
        let exists = self
            .client
            .describe_repositories()
            .repository_names(&repo_name)
            .send()
            .await
            .map(|resp| !resp.repositories().is_empty())
            .unwrap_or(false);

        if !exists {
            tracing::info!(repo_name, "creating ECR repository");
            self.client
                .create_repository()
                .repository_name(&repo_name)
                .send()
                .await
                .context("failed to create ECR repository")?;
        }
        Ok(())
    }
}

#[cfg(feature = "aws")]
#[async_trait]
impl RegistryProvider for EcrProvider {
    async fn get_credentials(&self, repository: &str) -> Result<RegistryCredentials> {
        self.ensure_repository(repository).await?;
        let (username, password) = self.get_pull_credentials().await?;
        Ok(RegistryCredentials {
            registry_url: format!("{}/{}", self.registry_host, self.repo_name(repository)),
            username,
            password,
            expires_in: Some(12 * 3600),
        })
    }

    async fn get_pull_credentials(&self) -> Result<(String, String)> {
        let auth = self
            .client
            .get_authorization_token()
            .send()
            .await
            .context("failed to get ECR authorization token")?;

        let token = auth
            .authorization_data()
            .first()
            .and_then(|d| d.authorization_token())
            .context("ECR returned no authorization data")?;

        let decoded = String::from_utf8(
            base64::Engine::decode(&base64::engine::general_purpose::STANDARD, token)
                .context("ECR authorization token was not valid base64")?,
        )?;
        let (username, password) = decoded
            .split_once(':')
            .context("ECR authorization token was not in user:password form")?;
        Ok((username.to_string(), password.to_string()))
    }

    fn registry_host(&self) -> &str {
        &self.registry_host
    }

    fn registry_url(&self) -> &str {
        &self.registry_host
    }
}

/// Builds the configured registry provider, if any. Returns `None` when no
/// `[registry]` section is configured, meaning callers fall back to treating
/// images as already resolvable by the cluster's own pull secrets.
pub async fn build_provider(settings: &Settings) -> Option<Arc<dyn RegistryProvider>> {
    match &settings.registry {
        Some(RegistrySettings::OciClientAuth { registry_url, namespace, .. }) => {
            Some(Arc::new(OciClientAuthProvider::new(registry_url.clone(), namespace.clone())) as Arc<dyn RegistryProvider>)
        }
        #[cfg(feature = "aws")]
        Some(RegistrySettings::Ecr { region, account_id, repo_prefix, access_key_id, secret_access_key, .. }) => {
            match EcrProvider::new(
                region.clone(),
                account_id.clone(),
                repo_prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
            )
            .await
            {
                Ok(provider) => Some(Arc::new(provider) as Arc<dyn RegistryProvider>),
                Err(e) => {
                    tracing::error!(error = ?e, "failed to initialize ECR registry provider");
                    None
                }
            }
        }
        #[cfg(not(feature = "aws"))]
        Some(RegistrySettings::Ecr { .. }) => {
            tracing::error!("registry.type = \"ecr\" configured but this build lacks the aws feature");
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oci_provider_joins_namespace_without_double_slash() {
        let p = OciClientAuthProvider::new("registry.example.com".into(), "myorg/".into());
        assert_eq!(p.registry_url(), "registry.example.com/myorg");
        assert_eq!(p.registry_host(), "registry.example.com");
    }

    #[test]
    fn oci_provider_handles_empty_namespace() {
        let p = OciClientAuthProvider::new("localhost:5000".into(), "".into());
        assert_eq!(p.registry_url(), "localhost:5000");
    }

    #[test]
    fn image_uri_formats_repository_and_tag() {
        let p = OciClientAuthProvider::new("registry.example.com".into(), "".into());
        assert_eq!(p.image_uri("checkout-api", "abc123"), "registry.example.com/checkout-api:abc123");
    }
}
