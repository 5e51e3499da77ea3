//! Role-based module/action authorization.
//!
//! A caller holding several roles gets the union of what those roles grant.
//! Matching is exact: no wildcards and no role hierarchy. A role or module the
//! source does not know grants nothing.

use std::collections::BTreeSet;
use std::future::Future;

use tracing::debug;

use crate::db::RoleStore;
use crate::error::{AuthError, Result, bounded};
use crate::principal::Principal;

/// Read side of the role-definition store.
pub trait RoleSource: Send + Sync {
    /// Union of the actions any of `roles` grants on `module`.
    fn module_actions(
        &self,
        roles: &[String],
        module: &str,
    ) -> impl Future<Output = Result<BTreeSet<String>>> + Send;
}

impl RoleSource for RoleStore {
    async fn module_actions(&self, roles: &[String], module: &str) -> Result<BTreeSet<String>> {
        bounded(RoleStore::module_actions(self, roles, module)).await
    }
}

/// Resolves permissions against the current role definitions on every call,
/// so edits take effect on the next check.
#[derive(Clone)]
pub struct PermissionResolver<S = RoleStore> {
    source: S,
}

impl<S: RoleSource> PermissionResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Does this single role list `action` under `module`?
    pub async fn has_permission(&self, role: &str, module: &str, action: &str) -> Result<bool> {
        let actions = self
            .source
            .module_actions(&[role.to_string()], module)
            .await?;
        Ok(actions.contains(action))
    }

    pub async fn allowed_actions(
        &self,
        roles: &BTreeSet<String>,
        module: &str,
    ) -> Result<BTreeSet<String>> {
        let roles: Vec<String> = roles.iter().cloned().collect();
        self.source.module_actions(&roles, module).await
    }

    /// True iff any role in `roles` grants `action` on `module`.
    pub async fn authorize(
        &self,
        roles: &BTreeSet<String>,
        module: &str,
        action: &str,
    ) -> Result<bool> {
        Ok(self.allowed_actions(roles, module).await?.contains(action))
    }

    /// [`authorize`](Self::authorize) for a principal, failing with
    /// [`AuthError::PermissionDenied`].
    pub async fn require(&self, principal: &Principal, module: &str, action: &str) -> Result<()> {
        if self.authorize(&principal.roles, module, action).await? {
            Ok(())
        } else {
            debug!(principal = %principal.id, module, action, "Permission denied");
            Err(AuthError::PermissionDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, RoleDefinition};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Role definitions held in memory.
    #[derive(Default)]
    struct MemoryRoles {
        roles: Mutex<BTreeMap<String, RoleDefinition>>,
    }

    impl MemoryRoles {
        fn insert(&self, role: RoleDefinition) {
            self.roles.lock().unwrap().insert(role.id.clone(), role);
        }
    }

    impl RoleSource for MemoryRoles {
        async fn module_actions(&self, roles: &[String], module: &str) -> Result<BTreeSet<String>> {
            let defs = self.roles.lock().unwrap();
            Ok(roles
                .iter()
                .filter_map(|r| defs.get(r))
                .filter_map(|def| def.permissions.get(module))
                .flatten()
                .cloned()
                .collect())
        }
    }

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn resolver() -> PermissionResolver<MemoryRoles> {
        let roles = MemoryRoles::default();
        roles.insert(RoleDefinition::new("editor").allow("posts", &["read", "update"]));
        roles.insert(
            RoleDefinition::new("author")
                .allow("posts", &["create", "read"])
                .allow("media", &["create"]),
        );
        PermissionResolver::new(roles)
    }

    #[tokio::test]
    async fn test_has_permission_exact_match() {
        let resolver = resolver();
        assert!(resolver.has_permission("editor", "posts", "update").await.unwrap());
        assert!(!resolver.has_permission("editor", "posts", "delete").await.unwrap());
        assert!(!resolver.has_permission("editor", "posts", "*").await.unwrap());
        assert!(!resolver.has_permission("editor", "media", "create").await.unwrap());
    }

    #[tokio::test]
    async fn test_authorize_is_union_across_roles() {
        let resolver = resolver();
        let both = set(&["editor", "author"]);

        assert!(resolver.authorize(&both, "posts", "update").await.unwrap());
        assert!(resolver.authorize(&both, "posts", "create").await.unwrap());
        assert!(resolver.authorize(&both, "media", "create").await.unwrap());
        assert_eq!(
            resolver.allowed_actions(&both, "posts").await.unwrap(),
            set(&["create", "read", "update"])
        );
    }

    #[tokio::test]
    async fn test_unknown_role_or_module_denies() {
        let resolver = resolver();
        assert!(!resolver.authorize(&set(&["ghost"]), "posts", "read").await.unwrap());
        assert!(!resolver.authorize(&set(&["editor"]), "nowhere", "read").await.unwrap());
        assert!(!resolver.authorize(&set(&[]), "posts", "read").await.unwrap());
    }

    #[tokio::test]
    async fn test_require_maps_to_permission_denied() {
        let resolver = resolver();
        let principal = Principal::new("uuid-1", ["author"]);
        assert!(resolver.require(&principal, "posts", "create").await.is_ok());
        assert!(matches!(
            resolver.require(&principal, "posts", "update").await,
            Err(AuthError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_role_edits_apply_without_restart() {
        let db = Database::open(":memory:").await.unwrap();
        db.roles().grant("editor", "posts", "update").await.unwrap();
        let resolver = PermissionResolver::new(db.roles());
        let editor = set(&["editor"]);

        assert!(resolver.authorize(&editor, "posts", "update").await.unwrap());

        db.roles().revoke("editor", "posts", "update").await.unwrap();
        assert!(!resolver.authorize(&editor, "posts", "update").await.unwrap());
    }
}
