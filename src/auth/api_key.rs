use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const KEY_PREFIX: &str = "encl_";

/// Generates a new opaque API key (`encl_<32 random bytes, hex>`) and its
/// stored hash. Only the hash is ever persisted; the plaintext is returned
/// once, at creation time.
pub fn generate() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = format!("{KEY_PREFIX}{}", hex::encode(bytes));
    let hash = hash(&plaintext);
    (plaintext, hash)
}

pub fn hash(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

/// Constant-time comparison against the stored hash to avoid timing leaks.
pub fn verify(plaintext: &str, stored_hash: &str) -> bool {
    let candidate = hash(plaintext);
    candidate.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

pub fn looks_like_api_key(value: &str) -> bool {
    value.starts_with(KEY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_verifies_against_its_own_hash() {
        let (plaintext, hash) = generate();
        assert!(looks_like_api_key(&plaintext));
        assert!(verify(&plaintext, &hash));
        assert!(!verify("wrong-key", &hash));
    }
}
