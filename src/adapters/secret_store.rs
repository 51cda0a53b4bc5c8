use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// Encrypted-at-rest secret store backed by the configured encryption
/// provider; values live in the `environments.variables` / a dedicated
/// secrets table, resolved at reconcile time and never logged.
pub struct EncryptedSecretStore {
    pool: sqlx::PgPool,
    encryption: std::sync::Arc<dyn crate::security::EncryptionProvider>,
    cache: RwLock<HashMap<String, String>>,
}

impl EncryptedSecretStore {
    pub fn new(pool: sqlx::PgPool, encryption: std::sync::Arc<dyn crate::security::EncryptionProvider>) -> Self {
        Self { pool, encryption, cache: RwLock::new(HashMap::new()) }
    }

    /// Invalidates the in-memory cache so the next `get` re-reads and
    /// re-decrypts from the store. Called by the rotation poller.
    pub fn invalidate(&self, key: &str) {
        self.cache.write().unwrap().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.cache.write().unwrap().clear();
    }
}

#[async_trait]
impl SecretStore for EncryptedSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(cached) = self.cache.read().unwrap().get(key).cloned() {
            return Ok(Some(cached));
        }

        let row: Option<(String,)> = sqlx::query_as("SELECT ciphertext FROM secrets WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((ciphertext,)) => {
                let value = self.encryption.decrypt(&ciphertext).await?;
                self.cache.write().unwrap().insert(key.to_string(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let ciphertext = self.encryption.encrypt(value).await?;
        sqlx::query(
            "INSERT INTO secrets (key, ciphertext, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET ciphertext = $2, updated_at = now()",
        )
        .bind(key)
        .bind(&ciphertext)
        .execute(&self.pool)
        .await?;
        self.invalidate(key);
        Ok(())
    }
}

/// Periodically invalidates cached secret material so a rotated value in the
/// store is picked up within one interval rather than staying cached forever.
pub async fn run_rotation_poller(store: std::sync::Arc<EncryptedSecretStore>, interval_secs: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        tracing::debug!("invalidating secret cache for scheduled rotation check");
        store.invalidate_all();
    }
}
