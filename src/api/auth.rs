//! Session API endpoints.
//!
//! - POST `/login` - Exchange credentials for an access token (rate limited)
//! - POST `/refresh` - Rotate the refresh cookie and mint an access token (rate limited)
//! - POST `/reset-password` - Set a new password with a reset token (rate limited)
//! - POST `/logout` - Revoke the presented refresh cookie
//! - POST `/logout-all` - Revoke every refresh token of the caller (CSRF)
//! - POST `/password` - Change the caller's password (CSRF)
//! - GET `/me` - Identity carried by the access token
//! - GET `/csrf` - Issue a fresh CSRF token
//! - GET `/sessions` - List the caller's live refresh tokens
//! - POST `/authorize` - Ask whether the caller may perform an action

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    middleware,
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::{ApiError, validate_name};
use crate::auth::{
    Auth, REFRESH_COOKIE_NAME, bearer_token, clear_refresh_cookie, get_cookie, new_refresh_cookie,
    require_auth,
};
use crate::csrf::require_csrf;
use crate::error::AuthError;
use crate::principal::Principal;
use crate::rate_limit::rate_limit_sensitive;
use crate::session::RefreshSession;

const MIN_PASSWORD_LENGTH: usize = 8;

pub fn router(state: AppState) -> Router {
    let rate_limited = Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/reset-password", post(reset_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_sensitive::<AppState>,
        ));

    let protected = Router::new()
        .route("/logout-all", post(logout_all))
        .route("/password", post(change_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_csrf::<AppState>,
        ))
        .route("/me", get(me))
        .route("/csrf", get(csrf_token))
        .route("/sessions", get(list_sessions))
        .route("/authorize", post(authorize))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<AppState>,
        ));

    Router::new()
        .route("/logout", post(logout))
        .merge(rate_limited)
        .merge(protected)
        .with_state(state)
}

#[derive(Deserialize)]
struct LoginRequest {
    /// Username, email or phone number
    #[serde(alias = "username", alias = "email", alias = "phone")]
    login: String,
    password: String,
}

#[derive(Serialize)]
struct UserInfo {
    uuid: String,
    username: Option<String>,
    email: Option<String>,
    preferred_language: String,
}

impl From<&Principal> for UserInfo {
    fn from(principal: &Principal) -> Self {
        Self {
            uuid: principal.id.clone(),
            username: principal.username.clone(),
            email: principal.email.clone(),
            preferred_language: principal.language().to_string(),
        }
    }
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    expires_in: u64,
    csrf_token: String,
    message: &'static str,
    user: UserInfo,
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let login = body.login.trim();
    if login.is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("Login and password are required"));
    }

    let presented = get_cookie(&headers, REFRESH_COOKIE_NAME);
    let outcome = state.core.login(login, &body.password, presented).await?;

    let response = LoginResponse {
        token: outcome.access.token,
        expires_in: outcome.access.duration,
        csrf_token: outcome.csrf_token,
        message: "Login successful",
        user: UserInfo::from(&outcome.principal),
    };

    let cookies = match outcome.refresh {
        RefreshSession::Issued(token) => {
            vec![(SET_COOKIE, new_refresh_cookie(&token, state.secure_cookies))]
        }
        RefreshSession::Reused { .. } => Vec::new(),
    };

    Ok((StatusCode::OK, AppendHeaders(cookies), Json(response)).into_response())
}

#[derive(Serialize)]
struct RefreshResponse {
    token: String,
    expires_in: u64,
}

async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let clear = [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))];

    let Some(presented) = get_cookie(&headers, REFRESH_COOKIE_NAME) else {
        return (clear, AuthError::InvalidRefreshToken).into_response();
    };

    match state.core.refresh(presented).await {
        Ok(outcome) => (
            StatusCode::OK,
            [(
                SET_COOKIE,
                new_refresh_cookie(&outcome.refresh, state.secure_cookies),
            )],
            Json(RefreshResponse {
                token: outcome.access.token,
                expires_in: outcome.access.duration,
            }),
        )
            .into_response(),
        // The cookie is dead either way; tell the client to drop it
        Err(e) if !e.is_server_error() => (clear, e).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

/// Revoke the refresh cookie, if any. Always succeeds and clears the cookie.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let presented = get_cookie(&headers, REFRESH_COOKIE_NAME);
    let principal = bearer_token(&headers).and_then(|token| state.core.jwt.verify(token).ok());

    state.core.logout(presented, principal.as_ref()).await?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(MessageResponse {
            message: "Logged out",
        }),
    )
        .into_response())
}

#[derive(Serialize)]
struct RevokedResponse {
    revoked: u64,
}

async fn logout_all(
    State(state): State<AppState>,
    Auth(principal): Auth,
) -> Result<Response, ApiError> {
    let revoked = state.core.logout_all(&principal).await?;
    Ok((
        StatusCode::OK,
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(RevokedResponse { revoked }),
    )
        .into_response())
}

fn check_password_length(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    token: String,
    new_password: String,
}

#[derive(Serialize)]
struct ResetPasswordResponse {
    message: &'static str,
    revoked: u64,
}

/// Redeem a password reset token. Ends every session of the account.
async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> Result<Response, ApiError> {
    if body.token.is_empty() {
        return Err(ApiError::bad_request("Token is required"));
    }
    check_password_length(&body.new_password)?;

    let revoked = state
        .core
        .reset_password(&body.token, &body.new_password)
        .await?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(ResetPasswordResponse {
            message: "Password updated successfully",
            revoked,
        }),
    )
        .into_response())
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    Auth(principal): Auth,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Response, ApiError> {
    check_password_length(&body.new_password)?;

    let revoked = state
        .core
        .change_password(&principal, &body.current_password, &body.new_password)
        .await?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(RevokedResponse { revoked }),
    )
        .into_response())
}

#[derive(Serialize)]
struct MeResponse {
    #[serde(flatten)]
    user: UserInfo,
    roles: Vec<String>,
}

async fn me(Auth(principal): Auth) -> Json<MeResponse> {
    Json(MeResponse {
        user: UserInfo::from(&principal),
        roles: principal.roles.into_iter().collect(),
    })
}

#[derive(Serialize)]
struct CsrfResponse {
    csrf_token: String,
}

async fn csrf_token(State(state): State<AppState>, Auth(principal): Auth) -> Json<CsrfResponse> {
    Json(CsrfResponse {
        csrf_token: state.core.csrf.issue(&principal.id),
    })
}

#[derive(Serialize)]
struct SessionInfo {
    id: String,
    created_at: i64,
    expires_at: i64,
}

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Auth(principal): Auth,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state
        .core
        .refresh
        .list_sessions(&principal.id)
        .await?
        .into_iter()
        .map(|r| SessionInfo {
            id: r.id,
            created_at: r.created_at,
            expires_at: r.expires_at,
        })
        .collect();

    Ok(Json(SessionsResponse { sessions }))
}

#[derive(Deserialize)]
struct AuthorizeRequest {
    module: String,
    action: String,
}

#[derive(Serialize)]
struct AuthorizeResponse {
    allowed: bool,
}

async fn authorize(
    State(state): State<AppState>,
    Auth(principal): Auth,
    Json(body): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    validate_name("Module", &body.module)?;
    validate_name("Action", &body.action)?;

    let allowed = state
        .core
        .permissions
        .authorize(&principal.roles, &body.module, &body.action)
        .await?;

    Ok(Json(AuthorizeResponse { allowed }))
}
