//! Role definition endpoints.
//!
//! Edits are read by the permission resolver on the next check; nothing is
//! cached.

use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    routing::get,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::AppState;
use super::error::{ApiError, validate_name};
use crate::auth::{Auth, require_auth};
use crate::csrf::require_csrf;
use crate::db::RoleDefinition;
use crate::error::bounded;

const ROLES_MODULE: &str = "roles";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_roles))
        .route("/{id}", get(get_role).put(replace_role))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_csrf::<AppState>,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<AppState>,
        ))
        .with_state(state)
}

async fn list_roles(
    State(state): State<AppState>,
    Auth(principal): Auth,
) -> Result<Json<Vec<RoleDefinition>>, ApiError> {
    state
        .core
        .permissions
        .require(&principal, ROLES_MODULE, "read")
        .await?;

    let roles = bounded(state.core.db.roles().list()).await?;
    Ok(Json(roles))
}

async fn get_role(
    State(state): State<AppState>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> Result<Json<RoleDefinition>, ApiError> {
    state
        .core
        .permissions
        .require(&principal, ROLES_MODULE, "read")
        .await?;
    validate_name("Role", &id)?;

    bounded(state.core.db.roles().get(&id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Role not found"))
}

#[derive(Deserialize)]
struct ReplaceRoleRequest {
    permissions: BTreeMap<String, BTreeSet<String>>,
}

/// Replace everything a role grants. An empty `permissions` map deletes it.
async fn replace_role(
    State(state): State<AppState>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(body): Json<ReplaceRoleRequest>,
) -> Result<Json<RoleDefinition>, ApiError> {
    state
        .core
        .permissions
        .require(&principal, ROLES_MODULE, "update")
        .await?;
    validate_name("Role", &id)?;
    for (module, actions) in &body.permissions {
        validate_name("Module", module)?;
        for action in actions {
            validate_name("Action", action)?;
        }
    }

    let role = RoleDefinition {
        id,
        permissions: body.permissions,
    };
    bounded(state.core.db.roles().replace(&role)).await?;

    info!(principal = %principal.id, role = %role.id, "Role updated");
    Ok(Json(role))
}
