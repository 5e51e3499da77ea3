use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

/// A role and the actions it grants per module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: String,
    pub permissions: BTreeMap<String, BTreeSet<String>>,
}

impl RoleDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            permissions: BTreeMap::new(),
        }
    }

    pub fn allow(mut self, module: &str, actions: &[&str]) -> Self {
        self.permissions
            .entry(module.to_string())
            .or_default()
            .extend(actions.iter().map(|a| a.to_string()));
        self
    }
}

/// Role definitions backed by the `role_permissions` table.
#[derive(Clone)]
pub struct RoleStore {
    pool: SqlitePool,
}

impl RoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Union of the actions granted on `module` by any of `roles`.
    pub async fn module_actions(
        &self,
        roles: &[String],
        module: &str,
    ) -> Result<BTreeSet<String>, sqlx::Error> {
        if roles.is_empty() {
            return Ok(BTreeSet::new());
        }
        let roles_json = serde_json::to_string(roles)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT action FROM role_permissions
             WHERE module = ? AND role_id IN (SELECT value FROM json_each(?))",
        )
        .bind(module)
        .bind(roles_json)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    /// Load one role. `None` if the role grants nothing.
    pub async fn get(&self, role_id: &str) -> Result<Option<RoleDefinition>, sqlx::Error> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT module, action FROM role_permissions WHERE role_id = ? ORDER BY module, action",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut role = RoleDefinition::new(role_id);
        for (module, action) in rows {
            role.permissions.entry(module).or_default().insert(action);
        }
        Ok(Some(role))
    }

    pub async fn list(&self) -> Result<Vec<RoleDefinition>, sqlx::Error> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT role_id, module, action FROM role_permissions ORDER BY role_id, module, action",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut roles: BTreeMap<String, RoleDefinition> = BTreeMap::new();
        for (role_id, module, action) in rows {
            roles
                .entry(role_id.clone())
                .or_insert_with(|| RoleDefinition::new(role_id))
                .permissions
                .entry(module)
                .or_default()
                .insert(action);
        }
        Ok(roles.into_values().collect())
    }

    /// Replace everything a role grants. An empty map removes the role.
    pub async fn replace(&self, role: &RoleDefinition) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = ?")
            .bind(&role.id)
            .execute(&mut *tx)
            .await?;
        for (module, actions) in &role.permissions {
            for action in actions {
                sqlx::query(
                    "INSERT INTO role_permissions (role_id, module, action) VALUES (?, ?, ?)",
                )
                .bind(&role.id)
                .bind(module)
                .bind(action)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn grant(&self, role_id: &str, module: &str, action: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, module, action) VALUES (?, ?, ?)",
        )
        .bind(role_id)
        .bind(module)
        .bind(action)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke(&self, role_id: &str, module: &str, action: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM role_permissions WHERE role_id = ? AND module = ? AND action = ?",
        )
        .bind(role_id)
        .bind(module)
        .bind(action)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
