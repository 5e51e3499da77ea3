//! One-time password reset tokens.
//!
//! Same bearer shape as refresh tokens, `"{id}:{secret}"`, with a bcrypt hash
//! of the secret at rest. A token belongs to one account, lives for an hour
//! and is spent by the password change it authorizes. Delivering the token to
//! its owner is left to the caller.

use std::time::Duration;

use uuid::Uuid;

use crate::db::{NewPasswordReset, PasswordResetRecord, PasswordResetStore, unix_now};
use crate::error::{AuthError, Result, bounded};
use crate::password::{PasswordHasher, random_secret};
use crate::refresh::parse;

/// Password reset token lifetime: 1 hour
pub const PASSWORD_RESET_LIFETIME: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct IssuedPasswordReset {
    pub token: String,
    pub id: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct PasswordResetService {
    store: PasswordResetStore,
    hasher: PasswordHasher,
    lifetime: Duration,
}

impl PasswordResetService {
    pub fn new(store: PasswordResetStore, hasher: PasswordHasher) -> Self {
        Self {
            store,
            hasher,
            lifetime: PASSWORD_RESET_LIFETIME,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub async fn issue(&self, account_id: i64) -> Result<IssuedPasswordReset> {
        let now = unix_now();
        let id = Uuid::new_v4().simple().to_string();
        let secret = random_secret();
        let hash = self.hasher.hash_async(&secret).await?;
        let expires_at =
            now.saturating_add(i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX));

        bounded(self.store.insert(&NewPasswordReset {
            id: &id,
            account_id,
            secret_hash: &hash,
            created_at: now,
            expires_at,
        }))
        .await?;

        Ok(IssuedPasswordReset {
            token: format!("{id}:{secret}"),
            id,
            expires_at,
        })
    }

    /// Resolve a bearer value to an unspent, unexpired record.
    pub async fn verify(&self, token: &str) -> Result<PasswordResetRecord> {
        let (id, secret) = parse(token).ok_or(AuthError::InvalidResetToken)?;

        let record = bounded(self.store.get(id)).await?;
        let matches = self
            .hasher
            .verify_async(record.as_ref().map(|r| r.secret_hash.as_str()), secret)
            .await?;

        match record {
            Some(record) if matches && record.is_usable(unix_now()) => Ok(record),
            _ => Err(AuthError::InvalidResetToken),
        }
    }

    /// Spend `record` and store `password_hash` for its account. Fails if a
    /// concurrent caller spent it first or it expired in the meantime.
    pub async fn consume(&self, record: &PasswordResetRecord, password_hash: &str) -> Result<()> {
        let consumed = bounded(self.store.consume(
            &record.id,
            record.account_id,
            password_hash,
            unix_now(),
        ))
        .await?;
        if consumed {
            Ok(())
        } else {
            Err(AuthError::InvalidResetToken)
        }
    }

    /// Delete spent resets and resets that expired more than `retention` ago.
    pub async fn purge_stale(&self, retention: Duration) -> Result<u64> {
        let retention = i64::try_from(retention.as_secs()).unwrap_or(i64::MAX);
        bounded(self.store.purge_stale(unix_now().saturating_sub(retention))).await
    }
}
