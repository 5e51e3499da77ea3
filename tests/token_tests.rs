mod common;

use axum::http::StatusCode;
use common::{
    TestApp, clears_refresh_cookie, get, json_body, mutate, refresh_cookie, refresh_request,
};
use tower::ServiceExt;

#[tokio::test]
async fn test_refresh_rotates_cookie() {
    let t = TestApp::new().await;
    t.create_account("alice", &["editor"]).await;
    let session = t.login("alice").await;

    let response = t.send(refresh_request(&session.refresh)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = refresh_cookie(&response).unwrap();
    assert_ne!(rotated, session.refresh);

    let json = json_body(response).await;
    assert_eq!(json["expires_in"], 900);
    let access = json["token"].as_str().unwrap();
    assert_eq!(t.send(get("/api/auth/me", access)).await.status(), StatusCode::OK);

    // The new token works exactly once more
    assert_eq!(t.send(refresh_request(&rotated)).await.status(), StatusCode::OK);
    assert_eq!(
        t.send(refresh_request(&rotated)).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_replayed_refresh_token_rejected_and_cookie_cleared() {
    let t = TestApp::new().await;
    t.create_account("alice", &["editor"]).await;
    let session = t.login("alice").await;

    assert_eq!(
        t.send(refresh_request(&session.refresh)).await.status(),
        StatusCode::OK
    );

    let response = t.send(refresh_request(&session.refresh)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(clears_refresh_cookie(&response));
    assert!(refresh_cookie(&response).is_none());
}

#[tokio::test]
async fn test_malformed_and_missing_refresh_cookie() {
    let t = TestApp::new().await;

    for token in ["garbage", "abc:", ":def", "nope:nope"] {
        let response = t.send(refresh_request(token)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "token {token}");
        assert!(clears_refresh_cookie(&response));
    }

    let response = t
        .send(
            axum::http::Request::builder()
                .method("POST")
                .uri("/api/auth/refresh")
                .header("x-forwarded-for", common::CLIENT_IP)
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let t = TestApp::new().await;
    t.create_account("alice", &["editor"]).await;
    let session = t.login("alice").await;

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let app = t.app.clone();
            let request = refresh_request(&session.refresh);
            tokio::spawn(async move { app.oneshot(request).await.unwrap().status() })
        })
        .collect();

    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::UNAUTHORIZED => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn test_bad_access_tokens_rejected() {
    let t = TestApp::new().await;
    t.create_account("alice", &["editor"]).await;
    let session = t.login("alice").await;

    let mut tampered = session.access.clone();
    tampered.push('x');
    assert_eq!(
        t.send(get("/api/auth/me", &tampered)).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        t.send(get("/api/auth/me", "not.a.jwt")).await.status(),
        StatusCode::UNAUTHORIZED
    );

    let response = t
        .send(
            axum::http::Request::builder()
                .uri("/api/auth/me")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // A refresh token is not an access token
    assert_eq!(
        t.send(get("/api/auth/me", &session.refresh)).await.status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_sessions_and_logout_all() {
    let t = TestApp::new().await;
    t.create_account("alice", &["editor"]).await;
    let first = t.login("alice").await;
    let second = t.login("alice").await;

    let response = t.send(get("/api/auth/sessions", &second.access)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["sessions"].as_array().unwrap().len(), 2);

    let response = t
        .send(mutate(
            "POST",
            "/api/auth/logout-all",
            &second.access,
            Some(second.csrf.as_str()),
            serde_json::json!({}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(clears_refresh_cookie(&response));
    assert_eq!(json_body(response).await["revoked"], 2);

    for token in [&first.refresh, &second.refresh] {
        assert_eq!(
            t.send(refresh_request(token)).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    let json = json_body(t.send(get("/api/auth/sessions", &second.access)).await).await;
    assert!(json["sessions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_refresh_refused_after_roles_removed() {
    let t = TestApp::new().await;
    let uuid = t.create_account("alice", &["editor"]).await;
    let session = t.login("alice").await;

    let account = t.core.db.accounts().get_by_uuid(&uuid).await.unwrap().unwrap();
    t.core.db.accounts().set_roles(account.id, &[]).await.unwrap();

    let response = t.send(refresh_request(&session.refresh)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(t.core.refresh.list_sessions(&uuid).await.unwrap().is_empty());
}

fn refresh_cookie_max_age(response: &axum::http::Response<axum::body::Body>) -> u64 {
    response
        .headers()
        .get_all(axum::http::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refresh_token=") && !v.starts_with("refresh_token=;"))
        .and_then(|v| v.split("; ").find_map(|attr| attr.strip_prefix("Max-Age=")))
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_cookie_max_age_follows_refresh_lifetime() {
    let t = TestApp::with_policy(panelguard::service::SecurityPolicy {
        refresh_lifetime: std::time::Duration::from_secs(3600),
        ..common::test_policy()
    })
    .await;
    t.create_account("alice", &["editor"]).await;

    let response = t
        .send(common::login_request("alice", common::PASSWORD, None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let age = refresh_cookie_max_age(&response);
    assert!((3599..=3600).contains(&age), "login max age {age}");
    let token = refresh_cookie(&response).unwrap();

    let response = t.send(refresh_request(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let age = refresh_cookie_max_age(&response);
    assert!((3599..=3600).contains(&age), "refresh max age {age}");
}
