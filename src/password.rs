//! Credential verification with bcrypt.
//!
//! Hashing runs on the blocking pool; a cost-12 bcrypt round takes long
//! enough to stall a runtime worker.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::error::AuthError;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Secret hashed once at startup so that lookups for unknown accounts burn
/// the same amount of work as a real comparison.
const DUMMY_SECRET: &str = "panelguard-absent-account";

/// 32 random bytes, base64url without padding.
pub fn random_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Salted one-way hashing and verification of secrets.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    cost: u32,
    dummy_hash: String,
}

impl PasswordHasher {
    /// Create a hasher with the given bcrypt cost (4..=31).
    pub fn new(cost: u32) -> Result<Self, AuthError> {
        let dummy_hash = bcrypt::hash(DUMMY_SECRET, cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))?;
        Ok(Self { cost, dummy_hash })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a secret. Blocking.
    pub fn hash(&self, secret: &str) -> Result<String, AuthError> {
        bcrypt::hash(secret, self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Check a secret against a stored hash. Blocking.
    /// A malformed stored hash is a mismatch, not an error.
    pub fn verify(&self, stored_hash: &str, supplied: &str) -> bool {
        bcrypt::verify(supplied, stored_hash).unwrap_or(false)
    }

    /// Hash a secret on the blocking pool.
    pub async fn hash_async(&self, secret: &str) -> Result<String, AuthError> {
        let hasher = self.clone();
        let secret = secret.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
    }

    /// Check a secret on the blocking pool.
    ///
    /// `stored_hash` is `None` when no account matched; the comparison still
    /// runs against a dummy hash and always reports a mismatch, so the caller
    /// sees the same cost and the same answer for both cases.
    pub async fn verify_async(
        &self,
        stored_hash: Option<&str>,
        supplied: &str,
    ) -> Result<bool, AuthError> {
        let hasher = self.clone();
        let stored = stored_hash.map(str::to_string);
        let supplied = supplied.to_string();
        tokio::task::spawn_blocking(move || match stored {
            Some(hash) => hasher.verify(&hash, &supplied),
            None => {
                let _ = hasher.verify(&hasher.dummy_hash, &supplied);
                false
            }
        })
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COST: u32 = 4;

    #[test]
    fn test_hash_and_verify() {
        let hasher = PasswordHasher::new(TEST_COST).unwrap();
        let hash = hasher.hash("correct horse").unwrap();

        assert_ne!(hash, "correct horse");
        assert!(hasher.verify(&hash, "correct horse"));
        assert!(!hasher.verify(&hash, "battery staple"));
    }

    #[test]
    fn test_hashes_are_salted() {
        let hasher = PasswordHasher::new(TEST_COST).unwrap();
        let a = hasher.hash("same-secret").unwrap();
        let b = hasher.hash("same-secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_is_mismatch() {
        let hasher = PasswordHasher::new(TEST_COST).unwrap();
        assert!(!hasher.verify("not-a-bcrypt-hash", "anything"));
    }

    #[test]
    fn test_random_secret_shape() {
        let a = random_secret();
        let b = random_secret();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
        assert!(URL_SAFE_NO_PAD.decode(&a).is_ok());
    }

    #[test]
    fn test_invalid_cost_rejected() {
        assert!(PasswordHasher::new(2).is_err());
    }

    #[tokio::test]
    async fn test_verify_async_absent_account_is_mismatch() {
        let hasher = PasswordHasher::new(TEST_COST).unwrap();
        assert!(!hasher.verify_async(None, DUMMY_SECRET).await.unwrap());

        let hash = hasher.hash_async("s3cret").await.unwrap();
        assert!(hasher.verify_async(Some(hash.as_str()), "s3cret").await.unwrap());
        assert!(!hasher.verify_async(Some(hash.as_str()), "wrong").await.unwrap());
    }
}
