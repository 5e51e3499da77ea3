//! Error taxonomy for the credential and session core.
//!
//! Every verification failure collapses into one coarse kind before it leaves
//! the core, so callers never learn which sub-check rejected a credential.
//! Storage failures stay distinct internally and surface as a generic 500.

use std::future::Future;
use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Deadline applied to every persistence round-trip.
pub const STORE_DEADLINE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown account or wrong secret. Both are reported identically.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Account is temporarily locked. `until` is a Unix timestamp (seconds).
    #[error("Account locked")]
    AccountLocked { until: i64 },

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Unknown, spent or expired password reset token.
    #[error("Invalid reset token")]
    InvalidResetToken,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Invalid or missing CSRF token")]
    CsrfRejected,

    #[error("Too many requests")]
    RateLimited,

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Storage deadline exceeded")]
    StorageTimeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::InvalidRefreshToken => StatusCode::UNAUTHORIZED,
            AuthError::AccountLocked { .. } => StatusCode::LOCKED,
            AuthError::InvalidResetToken => StatusCode::BAD_REQUEST,
            AuthError::PermissionDenied | AuthError::CsrfRejected => StatusCode::FORBIDDEN,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Storage(_) | AuthError::StorageTimeout | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// True for failures of the backing store rather than of the credential.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            AuthError::Storage(_) | AuthError::StorageTimeout | AuthError::Internal(_)
        )
    }

    fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid credentials",
            AuthError::AccountLocked { .. } => "Account locked",
            AuthError::InvalidToken => "Invalid or expired token",
            AuthError::InvalidRefreshToken => "Invalid refresh token",
            AuthError::InvalidResetToken => "Invalid or expired reset token",
            AuthError::PermissionDenied => "Access denied",
            AuthError::CsrfRejected => "Invalid or missing CSRF token",
            AuthError::RateLimited => "Too many requests. Please try again later.",
            AuthError::Storage(_) | AuthError::StorageTimeout | AuthError::Internal(_) => {
                "Internal server error"
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    locked_until: Option<i64>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let locked_until = match self {
            AuthError::AccountLocked { until } => Some(until),
            _ => None,
        };

        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.public_message(),
                locked_until,
            }),
        )
            .into_response()
    }
}

/// Run a persistence call under [`STORE_DEADLINE`].
/// An elapsed deadline is a failure, never an assumed success.
pub async fn bounded<T, E, F>(fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    AuthError: From<E>,
{
    match tokio::time::timeout(STORE_DEADLINE, fut).await {
        Ok(result) => result.map_err(AuthError::from),
        Err(_) => Err(AuthError::StorageTimeout),
    }
}
