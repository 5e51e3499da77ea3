//! Refresh token records.
//!
//! Only the hash of a token's secret is stored. Records are never updated in
//! place except to flip them to revoked; rotation inserts a successor and
//! links it through `replaced_by`.

use sqlx::sqlite::SqlitePool;

/// A persisted refresh token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub principal_id: String,
    pub token_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
    pub revoked_at: Option<i64>,
    pub replaced_by: Option<String>,
}

impl RefreshTokenRecord {
    /// Live means neither revoked nor expired at `now`.
    pub fn is_live(&self, now: i64) -> bool {
        !self.revoked && self.expires_at > now
    }
}

/// A new record to insert.
#[derive(Debug, Clone)]
pub struct NewRefreshToken<'a> {
    pub id: &'a str,
    pub principal_id: &'a str,
    pub token_hash: &'a str,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

const RECORD_COLUMNS: &str =
    "id, principal_id, token_hash, created_at, expires_at, revoked, revoked_at, replaced_by";

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, token: &NewRefreshToken<'_>) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, principal_id, token_hash, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(token.id)
        .bind(token.principal_id)
        .bind(token.token_hash)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM refresh_tokens WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Revoke `old_id` and insert `successor` as one transaction.
    ///
    /// The revoke is a conditional update on `revoked = 0`; if another caller
    /// already flipped it, no row matches and nothing is written. Returns
    /// whether this caller won.
    pub async fn rotate(
        &self,
        old_id: &str,
        successor: &NewRefreshToken<'_>,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?, replaced_by = ?
             WHERE id = ? AND revoked = 0 AND expires_at > ?",
        )
        .bind(now)
        .bind(successor.id)
        .bind(old_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (id, principal_id, token_hash, created_at, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(successor.id)
        .bind(successor.principal_id)
        .bind(successor.token_hash)
        .bind(successor.created_at)
        .bind(successor.expires_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Revoke one token if it is still active. Returns whether a row changed.
    pub async fn revoke(&self, id: &str, now: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ? WHERE id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every active token of a principal. Returns the count.
    pub async fn revoke_all_for_principal(
        &self,
        principal_id: &str,
        now: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ? WHERE principal_id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(principal_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Live tokens of a principal, newest first.
    pub async fn list_live_for_principal(
        &self,
        principal_id: &str,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM refresh_tokens
             WHERE principal_id = ? AND revoked = 0 AND expires_at > ?
             ORDER BY created_at DESC, id"
        ))
        .bind(principal_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete records that expired before `cutoff`.
    pub async fn purge_expired_before(&self, cutoff: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn setup() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.accounts()
            .create("principal-1", "alice", None, None, "hash")
            .await
            .unwrap();
        db
    }

    fn token<'a>(id: &'a str, expires_at: i64) -> NewRefreshToken<'a> {
        NewRefreshToken {
            id,
            principal_id: "principal-1",
            token_hash: "hash",
            created_at: 100,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = setup().await;
        let store = db.refresh_tokens();

        store.insert(&token("t1", 1000)).await.unwrap();

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.principal_id, "principal-1");
        assert!(!record.revoked);
        assert!(record.is_live(500));
        assert!(!record.is_live(1000));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_only_once() {
        let db = setup().await;
        let store = db.refresh_tokens();
        store.insert(&token("t0", 1000)).await.unwrap();

        assert!(store.rotate("t0", &token("t1", 2000), 200).await.unwrap());
        assert!(!store.rotate("t0", &token("t2", 2000), 201).await.unwrap());

        let old = store.get("t0").await.unwrap().unwrap();
        assert!(old.revoked);
        assert_eq!(old.revoked_at, Some(200));
        assert_eq!(old.replaced_by.as_deref(), Some("t1"));

        assert!(store.get("t1").await.unwrap().is_some());
        // The losing successor was rolled back
        assert!(store.get("t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_expired_fails() {
        let db = setup().await;
        let store = db.refresh_tokens();
        store.insert(&token("t0", 1000)).await.unwrap();

        assert!(!store.rotate("t0", &token("t1", 2000), 1000).await.unwrap());
        assert!(store.get("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_and_list() {
        let db = setup().await;
        let store = db.refresh_tokens();
        store.insert(&token("a", 1000)).await.unwrap();
        store.insert(&token("b", 1000)).await.unwrap();
        store.insert(&token("c", 50)).await.unwrap();

        let live = store.list_live_for_principal("principal-1", 100).await.unwrap();
        assert_eq!(live.len(), 2);

        assert!(store.revoke("a", 100).await.unwrap());
        assert!(!store.revoke("a", 101).await.unwrap());

        assert_eq!(store.revoke_all_for_principal("principal-1", 102).await.unwrap(), 2);
        assert!(store
            .list_live_for_principal("principal-1", 100)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_before() {
        let db = setup().await;
        let store = db.refresh_tokens();
        store.insert(&token("old", 10)).await.unwrap();
        store.insert(&token("new", 1000)).await.unwrap();

        assert_eq!(store.purge_expired_before(500).await.unwrap(), 1);
        assert!(store.get("old").await.unwrap().is_none());
        assert!(store.get("new").await.unwrap().is_some());
    }
}
