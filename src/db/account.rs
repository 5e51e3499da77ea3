use sqlx::sqlite::SqlitePool;

use super::unix_now;

#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub uuid: String,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub preferred_language: Option<String>,
    pub failed_attempts: i64,
    pub locked_until: Option<i64>,
}

/// Failure counter and lock timestamp of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct FailureState {
    pub failed_attempts: i64,
    pub locked_until: Option<i64>,
}

const ACCOUNT_COLUMNS: &str = "id, uuid, username, email, phone, password_hash, preferred_language, failed_attempts, locked_until";

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an account. Returns the account ID.
    pub async fn create(
        &self,
        uuid: &str,
        username: &str,
        email: Option<&str>,
        phone: Option<&str>,
        password_hash: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO accounts (uuid, username, email, phone, password_hash, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(username)
        .bind(email)
        .bind(phone)
        .bind(password_hash)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Look an account up by username, email or phone number.
    pub async fn get_by_login(&self, login: &str) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = ?1 OR email = ?1 OR phone = ?1 LIMIT 1"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE uuid = ?"))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn set_preferred_language(
        &self,
        id: i64,
        language: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET preferred_language = ? WHERE id = ?")
            .bind(language)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_password_hash(&self, id: i64, hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE accounts SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Role names assigned to an account, sorted.
    pub async fn roles(&self, id: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT role_id FROM account_roles WHERE account_id = ? ORDER BY role_id")
                .bind(id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(r,)| r).collect())
    }

    /// Replace the role set of an account.
    pub async fn set_roles(&self, id: i64, roles: &[String]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM account_roles WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for role in roles {
            sqlx::query("INSERT OR IGNORE INTO account_roles (account_id, role_id) VALUES (?, ?)")
                .bind(id)
                .bind(role)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Increment the failure counter and, when the new count reaches
    /// `threshold`, set `locked_until` to `lock_until`. One statement, so
    /// concurrent failures can never both observe the pre-lock count.
    /// Returns `None` if the account does not exist.
    pub async fn record_failure(
        &self,
        id: i64,
        threshold: i64,
        lock_until: i64,
    ) -> Result<Option<FailureState>, sqlx::Error> {
        sqlx::query_as(
            "UPDATE accounts
             SET failed_attempts = failed_attempts + 1,
                 locked_until = CASE WHEN failed_attempts + 1 >= ? THEN ? ELSE locked_until END
             WHERE id = ?
             RETURNING failed_attempts, locked_until",
        )
        .bind(threshold)
        .bind(lock_until)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Clear the failure counter and the lock together.
    pub async fn reset_failures(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET failed_attempts = 0, locked_until = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn failure_state(&self, id: i64) -> Result<Option<FailureState>, sqlx::Error> {
        sqlx::query_as("SELECT failed_attempts, locked_until FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }
}
