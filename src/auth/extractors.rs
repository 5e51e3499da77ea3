//! Axum extractors and middleware for bearer authentication.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::ip::HasHeadersAndExtensions;
use super::state::HasAuthBackend;
use crate::error::AuthError;
use crate::principal::Principal;

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the caller of a request.
///
/// A principal already placed in the request extensions by an earlier layer
/// is reused; otherwise the bearer token is verified.
pub fn authenticate<T, S>(source: &T, state: &S) -> Result<Principal, AuthError>
where
    T: HasHeadersAndExtensions,
    S: HasAuthBackend,
{
    if let Some(principal) = source.extensions().get::<Principal>() {
        return Ok(principal.clone());
    }
    let token = bearer_token(source.headers()).ok_or(AuthError::InvalidToken)?;
    state.core().jwt.verify(token)
}

/// Middleware that rejects requests without a valid access token and stores
/// the principal in the request extensions for later layers and handlers.
pub async fn require_auth<S>(State(state): State<S>, mut request: Request, next: Next) -> Response
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    match authenticate(&request, &state) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Extractor for endpoints that require authentication.
pub struct Auth(pub Principal);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).map(Auth)
    }
}
