mod account;
mod password_reset;
mod refresh_token;
mod role;

use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use account::{Account, AccountStore, FailureState};
pub use password_reset::{NewPasswordReset, PasswordResetRecord, PasswordResetStore};
pub use refresh_token::{NewRefreshToken, RefreshTokenRecord, RefreshTokenStore};
pub use role::{RoleDefinition, RoleStore};

/// Current Unix time in seconds. All stored timestamps use this unit.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let pool = if path == ":memory:" {
            // Each in-memory connection is its own database, so keep exactly
            // one and never let it be recycled.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&format!("sqlite:{}?mode=rwc", path))
                .await?
        };

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        if version < 2 {
            self.migrate_v2().await?;
        }

        if version < 3 {
            self.migrate_v3().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                "CREATE TABLE accounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    username TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    email TEXT UNIQUE COLLATE NOCASE,
                    phone TEXT UNIQUE,
                    password_hash TEXT NOT NULL,
                    preferred_language TEXT,
                    failed_attempts INTEGER NOT NULL DEFAULT 0,
                    locked_until INTEGER,
                    created_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_accounts_uuid ON accounts(uuid)",
                "CREATE TABLE account_roles (
                    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                    role_id TEXT NOT NULL,
                    PRIMARY KEY (account_id, role_id)
                )",
                // Each row grants one action on one module to one role
                "CREATE TABLE role_permissions (
                    role_id TEXT NOT NULL,
                    module TEXT NOT NULL,
                    action TEXT NOT NULL,
                    PRIMARY KEY (role_id, module, action)
                )",
                "CREATE INDEX idx_role_permissions_module ON role_permissions(module, role_id)",
            ],
        )
        .await
    }

    async fn migrate_v2(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            2,
            &[
                // Revoked and expired rows are kept for replay detection
                // until the janitor purges them.
                "CREATE TABLE refresh_tokens (
                    id TEXT PRIMARY KEY,
                    principal_id TEXT NOT NULL REFERENCES accounts(uuid) ON DELETE CASCADE,
                    token_hash TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    revoked INTEGER NOT NULL DEFAULT 0,
                    revoked_at INTEGER,
                    replaced_by TEXT
                )",
                "CREATE INDEX idx_refresh_tokens_principal ON refresh_tokens(principal_id, revoked)",
                "CREATE INDEX idx_refresh_tokens_expires_at ON refresh_tokens(expires_at)",
            ],
        )
        .await
    }

    async fn migrate_v3(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            3,
            &[
                "CREATE TABLE password_resets (
                    id TEXT PRIMARY KEY,
                    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                    secret_hash TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    used_at INTEGER
                )",
                "CREATE INDEX idx_password_resets_expires_at ON password_resets(expires_at)",
            ],
        )
        .await
    }

    /// Get the account store.
    pub fn accounts(&self) -> AccountStore {
        AccountStore::new(self.pool.clone())
    }

    /// Get the refresh token store.
    pub fn refresh_tokens(&self) -> RefreshTokenStore {
        RefreshTokenStore::new(self.pool.clone())
    }

    /// Get the password reset store.
    pub fn password_resets(&self) -> PasswordResetStore {
        PasswordResetStore::new(self.pool.clone())
    }

    /// Get the role definition store.
    pub fn roles(&self) -> RoleStore {
        RoleStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
