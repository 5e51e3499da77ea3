//! Scheduled cleanup tasks for expired tokens and idle rate buckets.

use std::sync::Arc;
use std::time::Duration;

use governor::clock::Clock;
use tracing::{error, info};

use crate::rate_limit::{ClientRateLimiter, SWEEP_INTERVAL};
use crate::refresh::RefreshTokenService;
use crate::reset::PasswordResetService;

/// How long expired or revoked refresh tokens are kept for replay detection.
pub const TOKEN_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60); // 30 days

/// Interval between token cleanup runs.
const TOKEN_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Delete refresh token records past their retention.
pub async fn run_token_cleanup(refresh: &RefreshTokenService) {
    match refresh.purge_expired(TOKEN_RETENTION).await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired refresh tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired refresh tokens: {}", e),
    }
}

/// Delete spent password resets and expired ones. Unlike refresh tokens
/// they are not kept for replay detection.
pub async fn run_reset_cleanup(resets: &PasswordResetService) {
    match resets.purge_stale(Duration::ZERO).await {
        Ok(count) if count > 0 => info!("Cleaned up {} stale password resets", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up password resets: {}", e),
    }
}

/// Drop rate limit buckets that have fully replenished.
pub fn run_bucket_sweep<C: Clock>(limiter: &ClientRateLimiter<C>) {
    let count = limiter.sweep();
    if count > 0 {
        info!("Evicted {} idle rate limit buckets", count);
    }
}

/// Spawn a background task that purges refresh tokens and password resets
/// periodically. Returns a handle that can be used to abort the task.
pub fn spawn_token_cleanup(
    refresh: RefreshTokenService,
    resets: PasswordResetService,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOKEN_CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_token_cleanup(&refresh).await;
            run_reset_cleanup(&resets).await;
        }
    })
}

/// Spawn a background task that sweeps idle rate buckets every [`SWEEP_INTERVAL`].
pub fn spawn_bucket_sweeper<C>(limiter: Arc<ClientRateLimiter<C>>) -> tokio::task::JoinHandle<()>
where
    C: Clock + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            interval.tick().await;
            run_bucket_sweep(&limiter);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewRefreshToken, unix_now};
    use crate::password::PasswordHasher;
    use crate::rate_limit::RateLimitPolicy;
    use governor::clock::FakeRelativeClock;

    #[tokio::test]
    async fn test_token_cleanup_respects_retention() {
        let db = Database::open(":memory:").await.unwrap();
        db.accounts()
            .create("principal-1", "alice", None, None, "hash")
            .await
            .unwrap();
        let store = db.refresh_tokens();
        let now = unix_now();
        let day = 24 * 60 * 60;

        for (id, expires_at) in [
            ("ancient", now - 31 * day),
            ("recent", now - day),
            ("live", now + day),
        ] {
            store
                .insert(&NewRefreshToken {
                    id,
                    principal_id: "principal-1",
                    token_hash: "hash",
                    created_at: expires_at - day,
                    expires_at,
                })
                .await
                .unwrap();
        }

        let service = RefreshTokenService::new(store.clone(), PasswordHasher::new(4).unwrap());
        run_token_cleanup(&service).await;

        assert!(store.get("ancient").await.unwrap().is_none());
        assert!(store.get("recent").await.unwrap().is_some());
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reset_cleanup_drops_spent_and_expired() {
        let db = Database::open(":memory:").await.unwrap();
        let account_id = db
            .accounts()
            .create("principal-1", "alice", None, None, "hash")
            .await
            .unwrap();
        let resets = PasswordResetService::new(db.password_resets(), PasswordHasher::new(4).unwrap());

        let spent = resets.issue(account_id).await.unwrap();
        let record = resets.verify(&spent.token).await.unwrap();
        resets.consume(&record, "new-hash").await.unwrap();

        let expired = resets.issue(account_id).await.unwrap();
        sqlx::query("UPDATE password_resets SET expires_at = ? WHERE id = ?")
            .bind(unix_now() - 1)
            .bind(&expired.id)
            .execute(db.pool())
            .await
            .unwrap();

        let live = resets.issue(account_id).await.unwrap();

        run_reset_cleanup(&resets).await;

        let store = db.password_resets();
        assert!(store.get(&spent.id).await.unwrap().is_none());
        assert!(store.get(&expired.id).await.unwrap().is_none());
        assert!(store.get(&live.id).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drops_replenished_buckets() {
        let clock = FakeRelativeClock::default();
        let limiter =
            Arc::new(ClientRateLimiter::with_clock(RateLimitPolicy::default(), clock.clone()).unwrap());
        assert!(limiter.allow("10.0.0.1"));
        assert_eq!(limiter.len(), 1);

        let handle = spawn_bucket_sweeper(limiter.clone());

        // Still owes a token across the first sweeps
        tokio::time::sleep(SWEEP_INTERVAL * 2).await;
        tokio::task::yield_now().await;
        assert_eq!(limiter.len(), 1);

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(SWEEP_INTERVAL).await;
        tokio::task::yield_now().await;
        assert!(limiter.is_empty());

        handle.abort();
    }
}
