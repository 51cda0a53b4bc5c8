use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use rand::RngCore;

/// Encrypts/decrypts secret material at rest. Ciphertext is always a
/// base64-encoded string so it can sit in a plain TEXT column regardless of
/// which provider produced it.
#[async_trait]
pub trait EncryptionProvider: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String>;
    async fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// AES-256-GCM with a locally configured key. The nonce is generated per
/// call and prefixed onto the ciphertext before base64 encoding.
pub struct LocalAesGcmProvider {
    cipher: Aes256Gcm,
}

impl LocalAesGcmProvider {
    pub fn new(key: &str) -> Result<Self> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key)
            .context("encryption.key must be base64-encoded 32 bytes")?;
        if key_bytes.len() != 32 {
            bail!("encryption.key must decode to exactly 32 bytes for aes-gcm-256, got {}", key_bytes.len());
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).context("failed to initialize AES-256-GCM cipher")?;
        Ok(Self { cipher })
    }
}

#[async_trait]
impl EncryptionProvider for LocalAesGcmProvider {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("AES-GCM encryption failed: {e}"))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(combined))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(ciphertext)
            .context("ciphertext was not valid base64")?;
        if raw.len() < 12 {
            bail!("ciphertext too short to contain a nonce");
        }
        let (nonce_bytes, body) = raw.split_at(12);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| anyhow::anyhow!("AES-GCM decryption failed: {e}"))?;
        String::from_utf8(plaintext).context("decrypted secret was not valid UTF-8")
    }
}

/// Defers encrypt/decrypt to AWS KMS directly, so the plaintext key never
/// leaves KMS and rotation is managed on the AWS side.
#[cfg(feature = "aws")]
pub struct AwsKmsProvider {
    client: aws_sdk_kms::Client,
    key_id: String,
}

#[cfg(feature = "aws")]
impl AwsKmsProvider {
    pub async fn new(region: String, key_id: String, access_key_id: Option<String>, secret_access_key: Option<String>) -> Result<Self> {
        let aws_config = if let (Some(ak), Some(sk)) = (&access_key_id, &secret_access_key) {
            let creds = aws_sdk_kms::config::Credentials::new(ak, sk, None, None, "static");
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .credentials_provider(creds)
                .region(aws_config::Region::new(region))
                .load()
                .await
        } else {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(aws_config::Region::new(region))
                .load()
                .await
        };
        Ok(Self { client: aws_sdk_kms::Client::new(&aws_config), key_id })
    }
}

#[cfg(feature = "aws")]
#[async_trait]
impl EncryptionProvider for AwsKmsProvider {
    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let resp = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(aws_sdk_kms::primitives::Blob::new(plaintext.as_bytes()))
            .send()
            .await
            .context("KMS encrypt failed")?;
        let blob = resp.ciphertext_blob().context("KMS encrypt returned no ciphertext")?;
        Ok(base64::engine::general_purpose::STANDARD.encode(blob.as_ref()))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let raw = base64::engine::general_purpose::STANDARD.decode(ciphertext).context("ciphertext was not valid base64")?;
        let resp = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(aws_sdk_kms::primitives::Blob::new(raw))
            .send()
            .await
            .context("KMS decrypt failed")?;
        let blob = resp.plaintext().context("KMS decrypt returned no plaintext")?;
        String::from_utf8(blob.as_ref().to_vec()).context("decrypted secret was not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        base64::engine::general_purpose::STANDARD.encode([7u8; 32])
    }

    #[tokio::test]
    async fn round_trips_plaintext_through_aes_gcm() {
        let provider = LocalAesGcmProvider::new(&test_key()).unwrap();
        let ciphertext = provider.encrypt("super-secret-value").await.unwrap();
        assert_ne!(ciphertext, "super-secret-value");
        let plaintext = provider.decrypt(&ciphertext).await.unwrap();
        assert_eq!(plaintext, "super-secret-value");
    }

    #[test]
    fn rejects_key_of_wrong_length() {
        let short_key = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(LocalAesGcmProvider::new(&short_key).is_err());
    }
}
