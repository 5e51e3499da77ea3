//! Single-use, rotating refresh tokens.
//!
//! The bearer value is `"{id}:{secret}"`. The id locates the record; only a
//! bcrypt hash of the secret is stored. A successful rotation revokes the
//! presented record and issues a successor, so each value is accepted at most
//! once. All failures surface as [`AuthError::InvalidRefreshToken`].

use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{NewRefreshToken, RefreshTokenRecord, RefreshTokenStore, unix_now};
use crate::error::{AuthError, Result, bounded};
use crate::password::{PasswordHasher, random_secret};

/// Refresh token lifetime: 7 days
pub const REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A freshly minted refresh token. `token` is the only place the plaintext
/// secret ever appears.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub id: String,
    pub principal_id: String,
    pub expires_at: i64,
}

/// A presented token that passed a non-rotating check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRefreshToken {
    pub id: String,
    pub principal_id: String,
    pub expires_at: i64,
}

/// Split a bearer value into `(id, secret)`.
pub(crate) fn parse(token: &str) -> Option<(&str, &str)> {
    let (id, secret) = token.split_once(':')?;
    if id.is_empty() || secret.is_empty() || secret.contains(':') {
        return None;
    }
    Some((id, secret))
}

#[derive(Clone)]
pub struct RefreshTokenService {
    store: RefreshTokenStore,
    hasher: PasswordHasher,
    lifetime: Duration,
}

impl RefreshTokenService {
    pub fn new(store: RefreshTokenStore, hasher: PasswordHasher) -> Self {
        Self {
            store,
            hasher,
            lifetime: REFRESH_TOKEN_LIFETIME,
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Generate id, secret and hash for a new record. Does not persist.
    async fn mint(&self, principal_id: &str, now: i64) -> Result<(IssuedRefreshToken, String)> {
        let id = Uuid::new_v4().simple().to_string();
        let secret = random_secret();
        let hash = self.hasher.hash_async(&secret).await?;

        let issued = IssuedRefreshToken {
            token: format!("{id}:{secret}"),
            id,
            principal_id: principal_id.to_string(),
            expires_at: now.saturating_add(i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX)),
        };
        Ok((issued, hash))
    }

    /// Issue a new refresh token for a principal.
    pub async fn issue(&self, principal_id: &str) -> Result<IssuedRefreshToken> {
        let now = unix_now();
        let (issued, hash) = self.mint(principal_id, now).await?;

        bounded(self.store.insert(&NewRefreshToken {
            id: &issued.id,
            principal_id,
            token_hash: &hash,
            created_at: now,
            expires_at: issued.expires_at,
        }))
        .await?;

        Ok(issued)
    }

    /// Load the record behind a bearer value and check its secret.
    /// Revocation and expiry are left to the caller.
    async fn load_verified(&self, token: &str) -> Result<RefreshTokenRecord> {
        let (id, secret) = parse(token).ok_or(AuthError::InvalidRefreshToken)?;

        let record = bounded(self.store.get(id)).await?;
        let matches = self
            .hasher
            .verify_async(record.as_ref().map(|r| r.token_hash.as_str()), secret)
            .await?;

        match record {
            Some(record) if matches => Ok(record),
            _ => Err(AuthError::InvalidRefreshToken),
        }
    }

    /// Accept a refresh token once and replace it with a successor.
    ///
    /// Two concurrent calls with the same value race on a conditional update
    /// of the revoked flag; exactly one wins.
    pub async fn verify_and_rotate(&self, token: &str) -> Result<IssuedRefreshToken> {
        let record = self.load_verified(token).await?;
        let now = unix_now();

        if record.revoked {
            warn!(
                token_id = %record.id,
                principal = %record.principal_id,
                replaced_by = record.replaced_by.as_deref().unwrap_or(""),
                "Revoked refresh token presented (possible replay)"
            );
            return Err(AuthError::InvalidRefreshToken);
        }
        if record.expires_at <= now {
            return Err(AuthError::InvalidRefreshToken);
        }

        let (successor, hash) = self.mint(&record.principal_id, now).await?;
        let rotated = bounded(self.store.rotate(
            &record.id,
            &NewRefreshToken {
                id: &successor.id,
                principal_id: &record.principal_id,
                token_hash: &hash,
                created_at: now,
                expires_at: successor.expires_at,
            },
            now,
        ))
        .await?;

        if !rotated {
            warn!(
                token_id = %record.id,
                principal = %record.principal_id,
                "Refresh token lost a concurrent rotation (possible replay)"
            );
            return Err(AuthError::InvalidRefreshToken);
        }

        Ok(successor)
    }

    /// Check a token without rotating it. `None` when it would be rejected.
    pub async fn is_valid(&self, token: &str) -> Result<Option<ValidRefreshToken>> {
        let record = match self.load_verified(token).await {
            Ok(record) => record,
            Err(AuthError::InvalidRefreshToken) => return Ok(None),
            Err(e) => return Err(e),
        };

        if !record.is_live(unix_now()) {
            return Ok(None);
        }
        Ok(Some(ValidRefreshToken {
            id: record.id,
            principal_id: record.principal_id,
            expires_at: record.expires_at,
        }))
    }

    /// Revoke by id. Idempotent; returns whether an active record changed.
    pub async fn revoke(&self, token_id: &str) -> Result<bool> {
        bounded(self.store.revoke(token_id, unix_now())).await
    }

    /// Revoke the token behind a bearer value, if it verifies.
    pub async fn revoke_presented(&self, token: &str) -> Result<bool> {
        match self.load_verified(token).await {
            Ok(record) => self.revoke(&record.id).await,
            Err(AuthError::InvalidRefreshToken) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn revoke_all_for_principal(&self, principal_id: &str) -> Result<u64> {
        let count =
            bounded(self.store.revoke_all_for_principal(principal_id, unix_now())).await?;
        info!(principal = %principal_id, count, "Revoked all refresh tokens");
        Ok(count)
    }

    /// Live refresh tokens of a principal, newest first.
    pub async fn list_sessions(&self, principal_id: &str) -> Result<Vec<RefreshTokenRecord>> {
        bounded(self.store.list_live_for_principal(principal_id, unix_now())).await
    }

    /// Delete records that expired more than `retention` ago.
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64> {
        let cutoff = unix_now() - retention.as_secs() as i64;
        bounded(self.store.purge_expired_before(cutoff)).await
    }
}
