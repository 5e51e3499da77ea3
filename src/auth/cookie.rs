//! Refresh cookie helpers.

use axum::http::header;

use crate::db::unix_now;
use crate::refresh::IssuedRefreshToken;

/// Cookie name for the refresh token (long-lived, 7 days).
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

fn secure_suffix(secure: bool) -> &'static str {
    if secure { "; Secure" } else { "" }
}

/// `Set-Cookie` value carrying a refresh token. `max_age` is in seconds.
pub fn refresh_cookie(token: &str, max_age: u64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/api/auth; Max-Age={}{}",
        REFRESH_COOKIE_NAME,
        token,
        max_age,
        secure_suffix(secure)
    )
}

/// Refresh cookie that expires together with the stored token record.
pub fn new_refresh_cookie(issued: &IssuedRefreshToken, secure: bool) -> String {
    let max_age = u64::try_from(issued.expires_at.saturating_sub(unix_now())).unwrap_or(0);
    refresh_cookie(&issued.token, max_age, secure)
}

/// `Set-Cookie` value that deletes the refresh cookie.
pub fn clear_refresh_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/api/auth; Max-Age=0{}",
        REFRESH_COOKIE_NAME,
        secure_suffix(secure)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_cookie_simple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("refresh_token=abc:123"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("abc:123"));
    }

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; refresh_token=xyz789; lang=tr"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
        assert_eq!(get_cookie(&headers, "lang"), Some("tr"));
    }

    #[test]
    fn test_get_cookie_not_found() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("foo=bar"));

        assert_eq!(get_cookie(&headers, "refresh_token"), None);
    }

    #[test]
    fn test_get_cookie_no_header() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(get_cookie(&headers, "refresh_token"), None);
    }

    fn issued(expires_in: i64) -> IssuedRefreshToken {
        IssuedRefreshToken {
            token: "id:secret".to_string(),
            id: "id".to_string(),
            principal_id: "principal-1".to_string(),
            expires_at: unix_now() + expires_in,
        }
    }

    fn max_age(cookie: &str) -> u64 {
        cookie
            .split("; ")
            .find_map(|attr| attr.strip_prefix("Max-Age="))
            .unwrap()
            .parse()
            .unwrap()
    }

    #[test]
    fn test_refresh_cookie_attributes() {
        let cookie = new_refresh_cookie(&issued(3600), true);
        assert!(cookie.starts_with("refresh_token=id:secret;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.ends_with("; Secure"));

        assert!(!refresh_cookie("t", 10, false).contains("Secure"));
    }

    #[test]
    fn test_max_age_follows_record_expiry() {
        let age = max_age(&new_refresh_cookie(&issued(3600), false));
        assert!((3599..=3600).contains(&age), "max age {age}");

        assert_eq!(max_age(&new_refresh_cookie(&issued(-10), false)), 0);
    }

    #[test]
    fn test_clear_refresh_cookie() {
        let cookie = clear_refresh_cookie(false);
        assert!(cookie.starts_with("refresh_token=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
