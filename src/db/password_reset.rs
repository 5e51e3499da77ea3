//! Password reset records.
//!
//! Like refresh tokens, only a hash of the secret is stored. A record is
//! spent by stamping `used_at`; consuming it and replacing the account's
//! password hash happen in one transaction.

use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordResetRecord {
    pub id: String,
    pub account_id: i64,
    pub secret_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub used_at: Option<i64>,
}

impl PasswordResetRecord {
    pub fn is_usable(&self, now: i64) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewPasswordReset<'a> {
    pub id: &'a str,
    pub account_id: i64,
    pub secret_hash: &'a str,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct PasswordResetStore {
    pool: SqlitePool,
}

impl PasswordResetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, reset: &NewPasswordReset<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO password_resets (id, account_id, secret_hash, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(reset.id)
        .bind(reset.account_id)
        .bind(reset.secret_hash)
        .bind(reset.created_at)
        .bind(reset.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<PasswordResetRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, account_id, secret_hash, created_at, expires_at, used_at FROM password_resets WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Spend the reset `id` and set the account's new password hash.
    ///
    /// The spend is a conditional update on `used_at IS NULL` that also
    /// rechecks expiry, so of two concurrent calls only one changes a row.
    /// Returns whether this caller won.
    pub async fn consume(
        &self,
        id: &str,
        account_id: i64,
        password_hash: &str,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE password_resets SET used_at = ?
             WHERE id = ? AND account_id = ? AND used_at IS NULL AND expires_at > ?",
        )
        .bind(now)
        .bind(id)
        .bind(account_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE accounts SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Delete spent resets and resets that expired before `cutoff`.
    pub async fn purge_stale(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM password_resets WHERE used_at IS NOT NULL OR expires_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
