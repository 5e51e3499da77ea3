//! Login, refresh and logout flows.
//!
//! These tie the components together in the order a request passes through
//! them: lockout check, credential check, token issuance.

use tracing::{info, warn};

use crate::db::Account;
use crate::error::{AuthError, Result, bounded};
use crate::jwt::AccessTokenResult;
use crate::principal::Principal;
use crate::refresh::IssuedRefreshToken;
use crate::reset::IssuedPasswordReset;
use crate::service::AuthCore;

/// What happened to the client's refresh cookie during login.
#[derive(Debug, Clone)]
pub enum RefreshSession {
    /// A new refresh token was issued and must be sent to the client.
    Issued(IssuedRefreshToken),
    /// The presented cookie was still valid for this principal and is kept
    /// unchanged, including its original expiry.
    Reused { expires_at: i64 },
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub principal: Principal,
    pub access: AccessTokenResult,
    pub refresh: RefreshSession,
    pub csrf_token: String,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub principal: Principal,
    pub access: AccessTokenResult,
    pub refresh: IssuedRefreshToken,
}

impl AuthCore {
    async fn principal_for(&self, account: &Account) -> Result<Principal> {
        let roles = bounded(self.db.accounts().roles(account.id)).await?;
        Ok(Principal::new(account.uuid.clone(), roles)
            .with_username(account.username.clone())
            .with_email(account.email.clone())
            .with_language(account.preferred_language.clone()))
    }

    /// Authenticate by username, email or phone and start a session.
    ///
    /// `presented_refresh` is the refresh cookie the client already holds,
    /// if any. When it is still valid for the same principal it is kept
    /// instead of issuing another one.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        presented_refresh: Option<&str>,
    ) -> Result<LoginOutcome> {
        let account = bounded(self.db.accounts().get_by_login(login)).await?;

        let Some(account) = account else {
            // Same hashing work as a real comparison, same answer.
            self.hasher.verify_async(None, password).await?;
            warn!(login = %login, "Login failed");
            return Err(AuthError::InvalidCredentials);
        };

        self.lockout.ensure_unlocked(account.id).await.inspect_err(|_| {
            warn!(login = %login, "Login attempted on locked account");
        })?;

        if !self
            .hasher
            .verify_async(Some(account.password_hash.as_str()), password)
            .await?
        {
            let status = self.lockout.record_failure(account.id).await?;
            warn!(login = %login, locked = status.locked, "Login failed");
            return Err(match status.until {
                Some(until) if status.locked => AuthError::AccountLocked { until },
                _ => AuthError::InvalidCredentials,
            });
        }

        self.lockout.reset(account.id).await?;

        let principal = self.principal_for(&account).await?;
        if principal.roles.is_empty() {
            warn!(principal = %principal.id, "Login refused: account has no roles");
            return Err(AuthError::PermissionDenied);
        }

        let access = self.jwt.issue(&principal)?;
        let refresh = self.session_for(&principal, presented_refresh).await?;
        let csrf_token = self.csrf.issue(&principal.id);

        info!(principal = %principal.id, reused = matches!(refresh, RefreshSession::Reused { .. }), "Login succeeded");

        Ok(LoginOutcome {
            principal,
            access,
            refresh,
            csrf_token,
        })
    }

    async fn session_for(
        &self,
        principal: &Principal,
        presented_refresh: Option<&str>,
    ) -> Result<RefreshSession> {
        if let Some(token) = presented_refresh {
            if let Some(valid) = self.refresh.is_valid(token).await? {
                if valid.principal_id == principal.id {
                    return Ok(RefreshSession::Reused {
                        expires_at: valid.expires_at,
                    });
                }
            }
        }
        Ok(RefreshSession::Issued(self.refresh.issue(&principal.id).await?))
    }

    /// Exchange a refresh token for a new access token and a rotated refresh
    /// token.
    pub async fn refresh(&self, presented: &str) -> Result<RefreshOutcome> {
        let rotated = self.refresh.verify_and_rotate(presented).await?;

        let account = bounded(self.db.accounts().get_by_uuid(&rotated.principal_id)).await?;
        let principal = match account {
            Some(account) => self.principal_for(&account).await?,
            None => {
                self.refresh.revoke(&rotated.id).await?;
                return Err(AuthError::InvalidRefreshToken);
            }
        };

        if principal.roles.is_empty() {
            self.refresh.revoke(&rotated.id).await?;
            return Err(AuthError::InvalidRefreshToken);
        }

        let access = self.jwt.issue(&principal)?;
        Ok(RefreshOutcome {
            principal,
            access,
            refresh: rotated,
        })
    }

    /// End the session behind `presented`. Idempotent.
    pub async fn logout(&self, presented: Option<&str>, principal: Option<&Principal>) -> Result<bool> {
        let revoked = match presented {
            Some(token) => self.refresh.revoke_presented(token).await?,
            None => false,
        };
        if let Some(principal) = principal {
            self.csrf.revoke(&principal.id);
        }
        Ok(revoked)
    }

    /// End every session of the caller.
    pub async fn logout_all(&self, principal: &Principal) -> Result<u64> {
        let count = self.refresh.revoke_all_for_principal(&principal.id).await?;
        self.csrf.revoke(&principal.id);
        Ok(count)
    }

    /// End every session of another account, e.g. after a compromise.
    /// `None` if the account does not exist.
    pub async fn revoke_sessions_for(&self, account_uuid: &str) -> Result<Option<u64>> {
        let account = bounded(self.db.accounts().get_by_uuid(account_uuid)).await?;
        let Some(account) = account else {
            return Ok(None);
        };
        let count = self.refresh.revoke_all_for_principal(&account.uuid).await?;
        self.csrf.revoke(&account.uuid);
        Ok(Some(count))
    }

    /// Issue a password reset token for an account. `None` if the account
    /// does not exist.
    pub async fn issue_password_reset(
        &self,
        account_uuid: &str,
    ) -> Result<Option<IssuedPasswordReset>> {
        let account = bounded(self.db.accounts().get_by_uuid(account_uuid)).await?;
        let Some(account) = account else {
            return Ok(None);
        };
        let issued = self.resets.issue(account.id).await?;
        info!(account = %account.uuid, reset_id = %issued.id, "Password reset issued");
        Ok(Some(issued))
    }

    /// Set a new password with a reset token. The token is spent, the
    /// lockout is cleared and every refresh token of the account is revoked.
    /// Returns the number revoked.
    pub async fn reset_password(&self, token: &str, new: &str) -> Result<u64> {
        let record = self.resets.verify(token).await?;
        let account = bounded(self.db.accounts().get_by_id(record.account_id))
            .await?
            .ok_or(AuthError::InvalidResetToken)?;

        let hash = self.hasher.hash_async(new).await?;
        self.resets.consume(&record, &hash).await?;
        self.lockout.reset(account.id).await?;

        let revoked = self.refresh.revoke_all_for_principal(&account.uuid).await?;
        self.csrf.revoke(&account.uuid);
        info!(account = %account.uuid, revoked, "Password reset completed");
        Ok(revoked)
    }

    /// Replace the caller's password after checking the current one, then
    /// revoke every refresh token. Returns the number revoked.
    pub async fn change_password(
        &self,
        principal: &Principal,
        current: &str,
        new: &str,
    ) -> Result<u64> {
        let account = bounded(self.db.accounts().get_by_uuid(&principal.id))
            .await?
            .ok_or(AuthError::InvalidToken)?;

        self.lockout.ensure_unlocked(account.id).await?;

        if !self
            .hasher
            .verify_async(Some(account.password_hash.as_str()), current)
            .await?
        {
            let status = self.lockout.record_failure(account.id).await?;
            warn!(principal = %principal.id, "Password change failed: wrong current password");
            return Err(match status.until {
                Some(until) if status.locked => AuthError::AccountLocked { until },
                _ => AuthError::InvalidCredentials,
            });
        }

        let hash = self.hasher.hash_async(new).await?;
        bounded(self.db.accounts().update_password_hash(account.id, &hash)).await?;
        self.lockout.reset(account.id).await?;

        let revoked = self.refresh.revoke_all_for_principal(&principal.id).await?;
        info!(principal = %principal.id, revoked, "Password changed");
        Ok(revoked)
    }
}
