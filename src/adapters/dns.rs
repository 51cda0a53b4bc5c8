use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::settings::DnsSettings;

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Upserts a CNAME pointing `hostname` at the tunnel target.
    async fn upsert_cname(&self, hostname: &str) -> Result<()>;

    /// Configures the tunnel's ingress rule for `hostname`, routing it to
    /// the cluster-internal service address.
    async fn configure_tunnel_ingress(&self, hostname: &str, internal_target: &str) -> Result<()>;
}

/// Cloudflare-style DNS + tunnel provider: a zone-scoped API token manages
/// CNAME records, and a named tunnel's ingress rules route hostnames to
/// in-cluster services without a public load balancer.
pub struct CloudflareTunnelProvider {
    client: reqwest::Client,
    api_token: String,
    zone_id: String,
    account_id: String,
    tunnel_id: String,
}

impl CloudflareTunnelProvider {
    pub fn from_settings(settings: &DnsSettings) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_token: settings.api_token.clone().context("dns.api_token required for cloudflare provider")?,
            zone_id: settings.zone_id.clone().context("dns.zone_id required for cloudflare provider")?,
            account_id: settings.account_id.clone().context("dns.account_id required for cloudflare provider")?,
            tunnel_id: settings.tunnel_id.clone().context("dns.tunnel_id required for cloudflare provider")?,
        })
    }
}

#[async_trait]
impl DnsProvider for CloudflareTunnelProvider {
    async fn upsert_cname(&self, hostname: &str) -> Result<()> {
        let target = format!("{}.cfargotunnel.com", self.tunnel_id);
        let url = format!("https://api.cloudflare.com/client/v4/zones/{}/dns_records", self.zone_id);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({
                "type": "CNAME",
                "name": hostname,
                "content": target,
                "proxied": true,
            }))
            .send()
            .await
            .context("failed to call Cloudflare DNS API")?;

        if !resp.status().is_success() {
            anyhow::bail!("Cloudflare DNS upsert failed with status {}", resp.status());
        }
        Ok(())
    }

    async fn configure_tunnel_ingress(&self, hostname: &str, internal_target: &str) -> Result<()> {
        let url = format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/cfd_tunnel/{}/configurations",
            self.account_id, self.tunnel_id
        );

        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({
                "config": {
                    "ingress": [
                        { "hostname": hostname, "service": internal_target },
                        { "service": "http_status:404" }
                    ]
                }
            }))
            .send()
            .await
            .context("failed to call Cloudflare tunnel configuration API")?;

        if !resp.status().is_success() {
            anyhow::bail!("Cloudflare tunnel ingress configuration failed with status {}", resp.status());
        }
        Ok(())
    }
}
