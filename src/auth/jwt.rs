use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Claims carried by every Enclii-issued or externally-issued bearer token.
/// `sid` is looked up in the session cache on every request; a revoked
/// session id is rejected regardless of how well the signature verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub sid: uuid::Uuid,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Jwk {
    #[serde(rename = "use")]
    pub key_use: String,
    pub kty: String,
    pub kid: String,
    pub alg: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// There is deliberately no HS256/HMAC branch anywhere in this module — a
/// mis-signed or symmetric token cannot be accepted by construction, not
/// merely by configuration.
fn rs256_validation(audience: &str, issuer: &str) -> Validation {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[audience]);
    validation.set_issuer(&[issuer]);
    validation
}

/// Self-issued keys used in `auth_mode = "local"`: Enclii signs its own
/// tokens and serves its public key at `GET /v1/auth/jwks.json`.
pub struct LocalKeyPair {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    kid: String,
    jwk: Jwk,
}

impl LocalKeyPair {
    /// Generates an ephemeral RSA-2048 keypair. Production deployments
    /// should instead load a persisted key via `from_pem`; this path exists
    /// so a fresh local-mode deployment has working auth out of the box.
    pub fn generate() -> Result<Self> {
        use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey};
        use rsa::traits::PublicKeyParts;
        use rsa::RsaPrivateKey;

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).context("failed to generate RSA keypair")?;
        let public_key = private_key.to_public_key();

        let pem = private_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .context("failed to encode RSA private key")?;

        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())?;
        let public_pem = public_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .context("failed to encode RSA public key")?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())?;

        let n = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            public_key.n().to_bytes_be(),
        );
        let e = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            public_key.e().to_bytes_be(),
        );
        let kid: String = (0..16)
            .map(|_| rng.gen_range(0..16))
            .map(|n: u8| format!("{n:x}"))
            .collect();

        Ok(Self {
            encoding_key,
            decoding_key,
            jwk: Jwk {
                key_use: "sig".into(),
                kty: "RSA".into(),
                kid: kid.clone(),
                alg: "RS256".into(),
                n,
                e,
            },
            kid,
        })
    }

    pub fn sign(&self, sub: &str, email: &str, issuer: &str, audience: &str, ttl: Duration, sid: uuid::Uuid) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            email: email.to_string(),
            iss: issuer.to_string(),
            aud: audience.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: now,
            sid,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        jsonwebtoken::encode(&header, &claims, &self.encoding_key).context("failed to sign token")
    }

    pub fn jwks(&self) -> JwksResponse {
        JwksResponse { keys: vec![self.jwk_clone()] }
    }

    fn jwk_clone(&self) -> Jwk {
        Jwk {
            key_use: self.jwk.key_use.clone(),
            kty: self.jwk.kty.clone(),
            kid: self.jwk.kid.clone(),
            alg: self.jwk.alg.clone(),
            n: self.jwk.n.clone(),
            e: self.jwk.e.clone(),
        }
    }

    fn decode(&self, token: &str, kid: &str, audience: &str, issuer: &str) -> Result<Claims> {
        if kid != self.kid {
            return Err(anyhow!("unknown key id"));
        }
        let data = decode::<Claims>(token, &self.decoding_key, &rs256_validation(audience, issuer))?;
        Ok(data.claims)
    }
}

struct JwksCache {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Fetches and TTL-caches an external IdP's JWKS for `auth_mode = "oidc"`.
pub struct ExternalJwtValidator {
    jwks_url: String,
    issuer: String,
    audience: String,
    http_client: reqwest::Client,
    cache: RwLock<Option<JwksCache>>,
    ttl: Duration,
}

impl ExternalJwtValidator {
    pub fn new(jwks_url: String, issuer: String, audience: String) -> Self {
        Self {
            jwks_url,
            issuer,
            audience,
            http_client: reqwest::Client::new(),
            cache: RwLock::new(None),
            ttl: Duration::from_secs(3600),
        }
    }

    async fn fetch_jwks(&self) -> Result<HashMap<String, DecodingKey>> {
        let response: JwksResponse = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .context("failed to fetch JWKS")?
            .json()
            .await
            .context("failed to parse JWKS response")?;

        let mut keys = HashMap::new();
        for jwk in response.keys {
            if jwk.kty == "RSA" && jwk.key_use == "sig" {
                let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
                    .context("failed to build decoding key from JWK")?;
                keys.insert(jwk.kid, key);
            }
        }
        Ok(keys)
    }

    async fn get_key(&self, kid: &str) -> Result<DecodingKey> {
        {
            let guard = self.cache.read().await;
            if let Some(ref cache) = *guard {
                if cache.fetched_at.elapsed() < self.ttl {
                    if let Some(key) = cache.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        let keys = self.fetch_jwks().await?;
        let found = keys.get(kid).cloned();
        let mut guard = self.cache.write().await;
        *guard = Some(JwksCache { keys, fetched_at: Instant::now() });
        found.ok_or_else(|| anyhow!("no JWKS key for kid {kid}"))
    }

    pub async fn validate(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token).context("malformed token header")?;
        let kid = header.kid.ok_or_else(|| anyhow!("token missing kid"))?;
        let key = self.get_key(&kid).await?;
        let data = decode::<Claims>(token, &key, &rs256_validation(&self.audience, &self.issuer))?;
        Ok(data.claims)
    }
}

/// Selects between the self-issued local validator and the external OIDC
/// validator based on `auth_mode`; callers never see the distinction.
pub enum JwtValidator {
    Local(Arc<LocalKeyPair>),
    External(Arc<ExternalJwtValidator>),
}

impl JwtValidator {
    pub async fn validate(&self, token: &str, audience: &str, issuer: &str) -> Result<Claims> {
        match self {
            JwtValidator::Local(keypair) => {
                let header = decode_header(token).context("malformed token header")?;
                let kid = header.kid.ok_or_else(|| anyhow!("token missing kid"))?;
                keypair.decode(token, &kid, audience, issuer)
            }
            JwtValidator::External(validator) => validator.validate(token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypair_signs_and_validates_round_trip() {
        let keypair = LocalKeyPair::generate().unwrap();
        let sid = uuid::Uuid::new_v4();
        let token = keypair
            .sign("user-1", "user@example.com", "enclii", "enclii-api", Duration::from_secs(900), sid)
            .unwrap();

        let header = decode_header(&token).unwrap();
        let claims = keypair.decode(&token, &header.kid.unwrap(), "enclii-api", "enclii").unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.sid, sid);
    }

    #[test]
    fn rejects_unknown_kid() {
        let keypair = LocalKeyPair::generate().unwrap();
        let sid = uuid::Uuid::new_v4();
        let token = keypair
            .sign("user-1", "user@example.com", "enclii", "enclii-api", Duration::from_secs(900), sid)
            .unwrap();
        assert!(keypair.decode(&token, "not-the-real-kid", "enclii-api", "enclii").is_err());
    }

    #[test]
    fn jwks_exposes_only_rs256_public_material() {
        let keypair = LocalKeyPair::generate().unwrap();
        let jwks = keypair.jwks();
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].alg, "RS256");
        assert_eq!(jwks.keys[0].kty, "RSA");
    }
}
