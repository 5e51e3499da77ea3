//! Per-principal anti-forgery tokens.
//!
//! Each principal has exactly one live token. A mutating request must echo it
//! in the `X-CSRF-Token` header; on a match the token is replaced and the
//! replacement is returned in the same header of the response. A mismatch
//! never rotates, so guessing does not yield fresh tokens.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::auth::{HasAuthBackend, authenticate};
use crate::error::{AuthError, Result};
use crate::kv::KvStore;
use crate::password::random_secret;

pub const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Clone)]
pub struct CsrfManager {
    kv: Arc<dyn KvStore>,
}

fn key(principal_id: &str) -> String {
    format!("csrf:{principal_id}")
}

impl CsrfManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Issue a token, replacing any previous one.
    pub fn issue(&self, principal_id: &str) -> String {
        let token = random_secret();
        self.kv.set(&key(principal_id), token.clone());
        token
    }

    /// Check `supplied` against the stored token and replace it on a match.
    /// Returns the replacement.
    pub fn validate_and_rotate(&self, principal_id: &str, supplied: &str) -> Result<String> {
        let next = random_secret();
        if self
            .kv
            .compare_and_swap(&key(principal_id), supplied, next.clone())
        {
            Ok(next)
        } else {
            Err(AuthError::CsrfRejected)
        }
    }

    pub fn revoke(&self, principal_id: &str) {
        self.kv.delete(&key(principal_id));
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Middleware enforcing the CSRF token on mutating requests.
pub async fn require_csrf<S>(State(state): State<S>, mut request: Request, next: Next) -> Response
where
    S: HasAuthBackend + Clone + Send + Sync + 'static,
{
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let principal = match authenticate(&request, &state) {
        Ok(principal) => principal,
        Err(e) => return e.into_response(),
    };

    let supplied = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let rotated = match state.core().csrf.validate_and_rotate(&principal.id, supplied) {
        Ok(token) => token,
        Err(e) => {
            warn!(
                principal = %principal.id,
                method = %request.method(),
                path = %request.uri().path(),
                "CSRF token rejected"
            );
            return e.into_response();
        }
    };

    request.extensions_mut().insert(principal);
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&rotated) {
        response.headers_mut().insert(CSRF_HEADER, value);
    }
    response
}
