//! Admin API endpoints.
//!
//! Gated by the `users` module of the caller's roles.

use axum::{
    Json, Router,
    extract::{Path, State},
    middleware,
    routing::post,
};
use serde::Serialize;
use tracing::info;

use super::AppState;
use super::error::{ApiError, validate_uuid};
use crate::auth::{Auth, require_auth};
use crate::csrf::require_csrf;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/accounts/{uuid}/revoke-sessions", post(revoke_sessions))
        .route("/accounts/{uuid}/password-reset", post(issue_password_reset))
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

#[derive(Serialize)]
struct RevokedResponse {
    revoked: u64,
}

/// Revoke every refresh token of another account.
async fn revoke_sessions(
    State(state): State<AppState>,
    Auth(principal): Auth,
    Path(uuid): Path<String>,
) -> Result<Json<RevokedResponse>, ApiError> {
    state
        .core
        .permissions
        .require(&principal, "users", "update")
        .await?;
    validate_uuid(&uuid)?;

    let revoked = state
        .core
        .revoke_sessions_for(&uuid)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    info!(admin = %principal.id, account = %uuid, revoked, "Sessions revoked by admin");
    Ok(Json(RevokedResponse { revoked }))
}

#[derive(Serialize)]
struct PasswordResetResponse {
    token: String,
    expires_at: i64,
}

/// Issue a one-time password reset token for another account. Handing it to
/// the account owner is up to the caller.
async fn issue_password_reset(
    State(state): State<AppState>,
    Auth(principal): Auth,
    Path(uuid): Path<String>,
) -> Result<Json<PasswordResetResponse>, ApiError> {
    state
        .core
        .permissions
        .require(&principal, "users", "update")
        .await?;
    validate_uuid(&uuid)?;

    let issued = state
        .core
        .issue_password_reset(&uuid)
        .await?
        .ok_or_else(|| ApiError::not_found("Account not found"))?;

    info!(admin = %principal.id, account = %uuid, "Password reset issued by admin");
    Ok(Json(PasswordResetResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}
