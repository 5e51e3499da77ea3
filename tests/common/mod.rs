#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use panelguard::auth::ClientIpHeader;
use panelguard::db::{Database, RoleDefinition};
use panelguard::lockout::LockoutPolicy;
use panelguard::rate_limit::RateLimitPolicy;
use panelguard::service::{AuthCore, NewAccount, SecurityPolicy};
use panelguard::{ServerConfig, build_core, create_app};
use serde_json::Value;
use tower::ServiceExt;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const CLIENT_IP: &str = "203.0.113.7";
pub const PASSWORD: &str = "correct-horse-battery";

/// Fast hashing, a low lockout threshold, and a limiter generous enough
/// not to get in the way.
pub fn test_policy() -> SecurityPolicy {
    SecurityPolicy {
        bcrypt_cost: 4,
        lockout: LockoutPolicy {
            threshold: 3,
            window: Duration::from_secs(900),
        },
        rate_limit: RateLimitPolicy {
            capacity: 1000,
            refill_per_second: 1000.0,
        },
        ..SecurityPolicy::default()
    }
}

pub struct TestApp {
    pub app: Router,
    pub core: Arc<AuthCore>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_policy(test_policy()).await
    }

    pub async fn with_policy(policy: SecurityPolicy) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let config = ServerConfig {
            db,
            jwt_secret: JWT_SECRET.to_vec(),
            policy,
            secure_cookies: false,
            ip_header: Some(ClientIpHeader::XForwardedFor),
        };
        let core = build_core(&config).expect("Failed to build core");
        let app = create_app(core.clone(), &config);
        Self { app, core }
    }

    /// Create an account holding `roles` with [`PASSWORD`].
    pub async fn create_account(&self, username: &str, roles: &[&str]) -> String {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        let email = format!("{username}@example.com");
        self.core
            .create_account(&NewAccount {
                username,
                email: Some(email.as_str()),
                password: PASSWORD,
                roles: &roles,
                ..Default::default()
            })
            .await
            .expect("Failed to create account")
            .uuid
    }

    pub async fn define_role(&self, role: RoleDefinition) {
        self.core
            .db
            .roles()
            .replace(&role)
            .await
            .expect("Failed to define role");
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Log in and return the session pieces a browser would keep.
    pub async fn login(&self, login: &str) -> Session {
        let response = self.send(login_request(login, PASSWORD, None)).await;
        assert_eq!(response.status(), 200, "login failed for {login}");

        let cookie = refresh_cookie(&response).expect("login should set the refresh cookie");
        let json = json_body(response).await;
        Session {
            access: json["token"].as_str().unwrap().to_string(),
            csrf: json["csrf_token"].as_str().unwrap().to_string(),
            refresh: cookie,
        }
    }
}

pub struct Session {
    pub access: String,
    pub csrf: String,
    /// Refresh token value (without the cookie name)
    pub refresh: String,
}

pub fn login_request(login: &str, password: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header("content-type", "application/json")
        .header("x-forwarded-for", CLIENT_IP);
    if let Some(token) = cookie {
        builder = builder.header(header::COOKIE, format!("refresh_token={token}"));
    }
    let body = serde_json::json!({ "login": login, "password": password });
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn refresh_request(token: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/refresh")
        .header("x-forwarded-for", CLIENT_IP)
        .header(header::COOKIE, format!("refresh_token={token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn get(uri: &str, access: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {access}"))
        .body(Body::empty())
        .unwrap()
}

/// Mutating JSON request carrying bearer and CSRF headers.
pub fn mutate(method: &str, uri: &str, access: &str, csrf: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {access}"));
    if let Some(csrf) = csrf {
        builder = builder.header("x-csrf-token", csrf);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Value of the refresh cookie set by a response, if it sets a non-empty one.
pub fn refresh_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.strip_prefix("refresh_token="))
        .filter_map(|v| v.split(';').next())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Whether the response tells the client to drop the refresh cookie.
pub fn clears_refresh_cookie(response: &Response<Body>) -> bool {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.starts_with("refresh_token=;") && v.contains("Max-Age=0"))
}
