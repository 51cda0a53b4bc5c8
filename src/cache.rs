use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Single-address Redis-compatible cache. Every operation carries a short
/// timeout and a failure here must never block a read-only API path — see
/// `Cache::try_rate_limit`, which fails open.
#[derive(Clone)]
pub struct Cache {
    manager: ConnectionManager,
    op_timeout: Duration,
}

impl Cache {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis connection url")?;
        let manager = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { manager, op_timeout: Duration::from_millis(200) })
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .context("redis operation timed out")?
            .context("redis operation failed")
    }

    /// A session `sid` is revoked by writing a tombstone key with a TTL
    /// matching the longest-lived token that could reference it.
    pub async fn revoke_session(&self, sid: uuid::Uuid, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        let key = format!("session:revoked:{sid}");
        self.with_timeout(conn.set_ex::<_, _, ()>(key, 1, ttl.as_secs().max(1)))
            .await
    }

    pub async fn is_session_revoked(&self, sid: uuid::Uuid) -> Result<bool> {
        let mut conn = self.manager.clone();
        let key = format!("session:revoked:{sid}");
        let exists: bool = self.with_timeout(conn.exists(key)).await?;
        Ok(exists)
    }

    /// Used by the readiness probe; any successful round-trip is enough.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.manager.clone();
        self.with_timeout(redis::cmd("PING").query_async::<_, ()>(&mut conn)).await
    }

    /// Per-principal token bucket, approximated with a fixed window counter:
    /// `INCR` then set the expiry on first increment. Exceeding `limit`
    /// within the 60s window yields `Err` carrying seconds until reset.
    pub async fn try_rate_limit(&self, principal: &str, limit_per_minute: u32) -> RateLimitOutcome {
        let mut conn = self.manager.clone();
        let key = format!("ratelimit:{principal}");

        let result: redis::RedisResult<i64> = tokio::time::timeout(self.op_timeout, async {
            let count: i64 = conn.incr(&key, 1).await?;
            if count == 1 {
                let _: () = conn.expire(&key, 60).await?;
            }
            Ok(count)
        })
        .await
        .unwrap_or(Ok(0));

        match result {
            Ok(count) if count > limit_per_minute as i64 => RateLimitOutcome::Exceeded { retry_after_secs: 60 },
            Ok(_) => RateLimitOutcome::Allowed,
            // Cache failures never block a request; allow it through.
            Err(_) => RateLimitOutcome::Allowed,
        }
    }
}

pub enum RateLimitOutcome {
    Allowed,
    Exceeded { retry_after_secs: u64 },
}
