//! HTTP-layer adapter for the auth core.
//!
//! Access tokens travel in the `Authorization: Bearer` header and are checked
//! statelessly. Refresh tokens travel in an HTTP-only, same-site-strict
//! cookie and are only ever read by the login, refresh and logout routes.

mod cookie;
mod extractors;
mod ip;
mod state;

pub use cookie::{
    REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie, new_refresh_cookie, refresh_cookie,
};
pub use extractors::{Auth, authenticate, bearer_token, require_auth};
pub use ip::{ClientIpHeader, HasHeadersAndExtensions, extract_client_ip};
pub use state::HasAuthBackend;
