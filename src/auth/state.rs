//! Authentication state trait.

use super::ip::ClientIpHeader;
use crate::service::AuthCore;

/// Trait for state types that give the HTTP layer access to the auth core.
pub trait HasAuthBackend {
    fn core(&self) -> &AuthCore;

    /// Proxy header trusted for the client address, if any.
    fn ip_header(&self) -> Option<ClientIpHeader>;

    /// Whether cookies carry the `Secure` attribute.
    fn secure_cookies(&self) -> bool;
}
