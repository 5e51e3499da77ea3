//! Wiring of the auth components.
//!
//! [`AuthCore`] is built once at startup from a [`SecurityPolicy`] and shared
//! behind an `Arc`. It owns every piece of shared state the components need;
//! nothing is global.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::csrf::CsrfManager;
use crate::db::{Account, Database};
use crate::error::{AuthError, Result, bounded};
use crate::jwt::JwtConfig;
use crate::kv::{KvStore, MemoryKv};
use crate::lockout::{LockoutGuard, LockoutPolicy};
use crate::password::{DEFAULT_BCRYPT_COST, PasswordHasher};
use crate::permissions::PermissionResolver;
use crate::rate_limit::{ClientRateLimiter, RateLimitPolicy};
use crate::refresh::{REFRESH_TOKEN_LIFETIME, RefreshTokenService};
use crate::reset::PasswordResetService;

/// Security tunables, collected in one place.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityPolicy {
    pub bcrypt_cost: u32,
    pub lockout: LockoutPolicy,
    pub rate_limit: RateLimitPolicy,
    pub refresh_lifetime: Duration,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            lockout: LockoutPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            refresh_lifetime: REFRESH_TOKEN_LIFETIME,
        }
    }
}

/// New account details.
#[derive(Debug, Clone, Default)]
pub struct NewAccount<'a> {
    pub username: &'a str,
    pub email: Option<&'a str>,
    pub phone: Option<&'a str>,
    pub password: &'a str,
    pub roles: &'a [String],
}

pub struct AuthCore {
    pub db: Database,
    pub hasher: PasswordHasher,
    pub lockout: LockoutGuard,
    pub jwt: JwtConfig,
    pub refresh: RefreshTokenService,
    pub resets: PasswordResetService,
    pub permissions: PermissionResolver,
    pub csrf: CsrfManager,
    pub rate_limiter: Arc<ClientRateLimiter>,
}

impl AuthCore {
    /// Build the core with an in-process key-value store.
    pub fn new(db: Database, jwt_secret: &[u8], policy: &SecurityPolicy) -> Result<Self> {
        Self::with_kv(db, jwt_secret, policy, Arc::new(MemoryKv::new()))
    }

    pub fn with_kv(
        db: Database,
        jwt_secret: &[u8],
        policy: &SecurityPolicy,
        kv: Arc<dyn KvStore>,
    ) -> Result<Self> {
        let hasher = PasswordHasher::new(policy.bcrypt_cost)?;

        Ok(Self {
            lockout: LockoutGuard::new(db.accounts(), policy.lockout),
            jwt: JwtConfig::new(jwt_secret),
            refresh: RefreshTokenService::new(db.refresh_tokens(), hasher.clone())
                .with_lifetime(policy.refresh_lifetime),
            resets: PasswordResetService::new(db.password_resets(), hasher.clone()),
            permissions: PermissionResolver::new(db.roles()),
            csrf: CsrfManager::new(kv),
            rate_limiter: Arc::new(ClientRateLimiter::new(policy.rate_limit)?),
            hasher,
            db,
        })
    }

    /// Create an account with a hashed password and the given roles.
    pub async fn create_account(&self, account: &NewAccount<'_>) -> Result<Account> {
        let uuid = Uuid::new_v4().to_string();
        let hash = self.hasher.hash_async(account.password).await?;

        let accounts = self.db.accounts();
        let id = bounded(accounts.create(
            &uuid,
            account.username,
            account.email,
            account.phone,
            &hash,
        ))
        .await?;
        bounded(accounts.set_roles(id, account.roles)).await?;

        info!(username = %account.username, roles = ?account.roles, "Account created");

        bounded(accounts.get_by_id(id))
            .await?
            .ok_or_else(|| AuthError::Internal("account vanished after insert".to_string()))
    }
}
