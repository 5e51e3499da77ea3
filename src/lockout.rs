//! Per-account brute-force lockout.
//!
//! Counting is per account rather than per client address, so rotating
//! addresses does not reset the budget. Locks expire lazily: an account whose
//! `locked_until` lies in the past is unlocked without any write.

use std::time::Duration;

use tracing::warn;

use crate::db::{AccountStore, FailureState, unix_now};
use crate::error::{AuthError, Result, bounded};

pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
pub const DEFAULT_LOCKOUT_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that engage the lock.
    pub threshold: u32,
    /// How long an engaged lock lasts.
    pub window: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            window: DEFAULT_LOCKOUT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub locked: bool,
    /// Unix seconds; set only while locked.
    pub until: Option<i64>,
}

impl LockStatus {
    const UNLOCKED: LockStatus = LockStatus {
        locked: false,
        until: None,
    };

    fn from_state(state: FailureState, now: i64) -> Self {
        match state.locked_until {
            Some(until) if until > now => LockStatus {
                locked: true,
                until: Some(until),
            },
            _ => Self::UNLOCKED,
        }
    }
}

#[derive(Clone)]
pub struct LockoutGuard {
    accounts: AccountStore,
    policy: LockoutPolicy,
}

impl LockoutGuard {
    pub fn new(accounts: AccountStore, policy: LockoutPolicy) -> Self {
        Self { accounts, policy }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Count a failed attempt. Atomic under concurrent failures: the
    /// increment and threshold check run as one statement.
    pub async fn record_failure(&self, account_id: i64) -> Result<LockStatus> {
        let now = unix_now();
        let window = i64::try_from(self.policy.window.as_secs()).unwrap_or(i64::MAX);
        let until = now.saturating_add(window);

        let state = bounded(self.accounts.record_failure(
            account_id,
            i64::from(self.policy.threshold),
            until,
        ))
        .await?;

        let Some(state) = state else {
            return Ok(LockStatus::UNLOCKED);
        };

        let status = LockStatus::from_state(state, now);
        if status.locked {
            warn!(
                account_id,
                failed_attempts = state.failed_attempts,
                locked_until = until,
                "Account locked after repeated failures"
            );
        }
        Ok(status)
    }

    /// Clear counter and lock together.
    pub async fn reset(&self, account_id: i64) -> Result<()> {
        bounded(self.accounts.reset_failures(account_id)).await
    }

    pub async fn is_locked(&self, account_id: i64) -> Result<LockStatus> {
        let state = bounded(self.accounts.failure_state(account_id)).await?;
        Ok(state
            .map(|s| LockStatus::from_state(s, unix_now()))
            .unwrap_or(LockStatus::UNLOCKED))
    }

    /// Fail with [`AuthError::AccountLocked`] if the account is locked.
    pub async fn ensure_unlocked(&self, account_id: i64) -> Result<()> {
        match self.is_locked(account_id).await? {
            LockStatus {
                locked: true,
                until: Some(until),
            } => Err(AuthError::AccountLocked { until }),
            _ => Ok(()),
        }
    }
}
