mod admin;
mod auth;
mod error;
mod roles;

use axum::Router;
use std::sync::Arc;

use crate::auth::{ClientIpHeader, HasAuthBackend};
use crate::service::AuthCore;

pub use error::ApiError;

/// State shared by every API route.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<AuthCore>,
    pub secure_cookies: bool,
    pub ip_header: Option<ClientIpHeader>,
}

impl HasAuthBackend for AppState {
    fn core(&self) -> &AuthCore {
        &self.core
    }

    fn ip_header(&self) -> Option<ClientIpHeader> {
        self.ip_header
    }

    fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }
}

/// Create the API router.
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .nest("/auth", auth::router(state.clone()))
        .nest("/roles", roles::router(state.clone()))
        .nest("/admin", admin::router(state))
}
