//! Client IP extraction utilities.

use std::net::{IpAddr, SocketAddr};

use axum::{extract::ConnectInfo, http::request::Parts};

/// Proxy header trusted for the client address.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// First address of `X-Forwarded-For`
    XForwardedFor,
    /// `X-Real-IP`
    XRealIp,
}

impl ClientIpHeader {
    pub fn header_name(&self) -> &'static str {
        match self {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
        }
    }

    /// Parse the header value into a normalized address.
    pub fn extract(&self, value: &str) -> Result<String, &'static str> {
        let candidate = match self {
            ClientIpHeader::XForwardedFor => value.split(',').next().unwrap_or_default(),
            ClientIpHeader::XRealIp => value,
        };
        candidate
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain a valid address")
    }
}

/// Trait for types that provide access to HTTP headers and extensions.
/// Implemented for both `Parts` and `Request` to allow flexible IP extraction.
pub trait HasHeadersAndExtensions {
    fn headers(&self) -> &axum::http::HeaderMap;
    fn extensions(&self) -> &axum::http::Extensions;
}

impl HasHeadersAndExtensions for Parts {
    fn headers(&self) -> &axum::http::HeaderMap {
        &self.headers
    }
    fn extensions(&self) -> &axum::http::Extensions {
        &self.extensions
    }
}

impl<B> HasHeadersAndExtensions for axum::extract::Request<B> {
    fn headers(&self) -> &axum::http::HeaderMap {
        axum::extract::Request::headers(self)
    }
    fn extensions(&self) -> &axum::http::Extensions {
        axum::extract::Request::extensions(self)
    }
}

/// Extract client IP address based on configuration.
///
/// If `ip_header` is set, extracts IP from that header and returns an error
/// if the header is missing or invalid (does NOT fall back to SocketAddr).
///
/// If `ip_header` is None, uses the SocketAddr from ConnectInfo.
pub fn extract_client_ip<T: HasHeadersAndExtensions>(
    source: &T,
    ip_header: Option<ClientIpHeader>,
) -> Result<String, &'static str> {
    match ip_header {
        Some(header) => {
            let header_value = source
                .headers()
                .get(header.header_name())
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            header.extract(header_value)
        }
        None => source
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::Request;

    fn request_with(name: &str, value: &str) -> Request<Body> {
        Request::builder()
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let request = request_with("x-forwarded-for", "203.0.113.7, 10.0.0.1");
        assert_eq!(
            extract_client_ip(&request, Some(ClientIpHeader::XForwardedFor)).unwrap(),
            "203.0.113.7"
        );
    }

    #[test]
    fn test_real_ip() {
        let request = request_with("x-real-ip", " 2001:db8::1 ");
        assert_eq!(
            extract_client_ip(&request, Some(ClientIpHeader::XRealIp)).unwrap(),
            "2001:db8::1"
        );
    }

    #[test]
    fn test_missing_or_invalid_header_rejected() {
        let request = request_with("x-real-ip", "not-an-ip");
        assert!(extract_client_ip(&request, Some(ClientIpHeader::XRealIp)).is_err());
        assert!(extract_client_ip(&request, Some(ClientIpHeader::XForwardedFor)).is_err());
    }

    #[test]
    fn test_connect_info_fallback() {
        let mut request = Request::builder().body(Body::empty()).unwrap();
        assert!(extract_client_ip(&request, None).is_err());

        let addr: SocketAddr = "192.0.2.1:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(extract_client_ip(&request, None).unwrap(), "192.0.2.1");
    }
}
