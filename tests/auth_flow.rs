//! End-to-end tests through the HTTP router.

use axum::{
    body::{to_bytes, Body},
    extract::connect_info::MockConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use blog_auth::{
    auth::{
        AuthService, Deadline, JwtHandler, PasswordHasher, RefreshTokenStore, SqliteUserStore,
        TokenService,
    },
    create_router,
    middleware::{RateLimitConfig, RateLimiter},
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const SECRET: &str = "integration-test-secret-0123456789abcdef";

fn test_app() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("auth.db");
    let db_path = db_path.to_str().unwrap();

    let refresh_store = RefreshTokenStore::new(db_path, chrono::Duration::days(7)).unwrap();
    let user_store = SqliteUserStore::new(db_path).unwrap();
    let deadline = Deadline::default();
    let tokens = TokenService::new(Arc::new(JwtHandler::new(SECRET)), refresh_store, deadline);
    let service = Arc::new(AuthService::new(
        Arc::new(user_store),
        tokens,
        PasswordHasher::new(4),
        deadline,
    ));

    let app = create_router(service, RateLimiter::new(RateLimitConfig::default()))
        .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    (app, dir)
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    fn code(&self) -> &str {
        self.body["error"]["code"].as_str().unwrap_or_default()
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    Reply {
        status,
        headers,
        body,
    }
}

async fn register(app: &Router, username: &str, email: &str, password: &str) -> Reply {
    send(
        app,
        Method::POST,
        "/auth/register",
        Some(json!({ "username": username, "email": email, "password": password })),
        None,
    )
    .await
}

async fn login(app: &Router, username: &str, password: &str) -> Reply {
    send(
        app,
        Method::POST,
        "/auth/login",
        Some(json!({ "username": username, "password": password })),
        None,
    )
    .await
}

async fn refresh(app: &Router, refresh_token: &str) -> Reply {
    send(
        app,
        Method::POST,
        "/auth/refresh",
        Some(json!({ "refresh_token": refresh_token })),
        None,
    )
    .await
}

#[tokio::test]
async fn test_register_login_refresh_and_stale_refresh() {
    let (app, _dir) = test_app();

    let created = register(&app, "alice", "alice@example.com", "pw12345678").await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["username"], "alice");
    assert_eq!(created.body["role"], "author");
    assert!(created.body.get("password_hash").is_none());

    let session = login(&app, "alice", "pw12345678").await;
    assert_eq!(session.status, StatusCode::OK);
    assert_eq!(session.body["token_type"], "Bearer");
    assert_eq!(session.body["expires_in"], 900);
    assert_eq!(session.body["user"]["username"], "alice");
    let first_refresh = session.body["refresh_token"].as_str().unwrap().to_string();

    let rotated = refresh(&app, &first_refresh).await;
    assert_eq!(rotated.status, StatusCode::OK);
    let second_refresh = rotated.body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first_refresh, second_refresh);

    let stale = refresh(&app, &first_refresh).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    assert_eq!(stale.code(), "ERR_AUTH_REFRESH_TOKEN_INVALID");

    // The new access token works on an authenticated route
    let access = rotated.body["access_token"].as_str().unwrap();
    let me = send(&app, Method::GET, "/auth/me", None, Some(access)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["email"], "alice@example.com");
}

#[tokio::test]
async fn test_register_conflicts_and_validation() {
    let (app, _dir) = test_app();
    assert_eq!(
        register(&app, "alice", "alice@example.com", "pw12345678")
            .await
            .status,
        StatusCode::CREATED
    );

    let dup = register(&app, "alice", "other@example.com", "pw12345678").await;
    assert_eq!(dup.status, StatusCode::CONFLICT);
    assert_eq!(dup.code(), "ERR_USERNAME_TAKEN");

    let weak = register(&app, "bob", "bob@example.com", "short").await;
    assert_eq!(weak.status, StatusCode::BAD_REQUEST);
    assert_eq!(weak.code(), "ERR_VALIDATION");
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let (app, _dir) = test_app();
    register(&app, "realuser", "real@example.com", "pw12345678").await;

    let unknown = login(&app, "nonexistent", "x").await;
    let wrong = login(&app, "realuser", "wrongpass").await;

    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.body, wrong.body);
    assert_eq!(unknown.code(), "ERR_AUTH_INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_bearer_errors() {
    let (app, _dir) = test_app();

    let missing = send(&app, Method::GET, "/auth/me", None, None).await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
    assert_eq!(missing.code(), "ERR_AUTH_MISSING_TOKEN");

    let garbage = send(&app, Method::GET, "/auth/me", None, Some("not-a-jwt")).await;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
    assert_eq!(garbage.code(), "ERR_AUTH_TOKEN_INVALID");

    let foreign = JwtHandler::new("a-completely-different-secret-value!!")
        .issue_access_token(uuid::Uuid::new_v4(), blog_auth::auth::models::UserRole::Admin)
        .unwrap()
        .0;
    let forged = send(&app, Method::GET, "/auth/me", None, Some(&foreign)).await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);
    assert_eq!(forged.code(), "ERR_AUTH_TOKEN_INVALID");
}

#[tokio::test]
async fn test_change_password_revokes_existing_sessions() {
    let (app, _dir) = test_app();
    register(&app, "alice", "alice@example.com", "pw12345678").await;
    let session = login(&app, "alice", "pw12345678").await;
    let access = session.body["access_token"].as_str().unwrap().to_string();
    let old_refresh = session.body["refresh_token"].as_str().unwrap().to_string();

    let wrong = send(
        &app,
        Method::POST,
        "/auth/change-password",
        Some(json!({ "current_password": "nope-nope", "new_password": "newpass12345" })),
        Some(&access),
    )
    .await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.code(), "ERR_AUTH_INVALID_CURRENT_PASSWORD");

    let changed = send(
        &app,
        Method::POST,
        "/auth/change-password",
        Some(json!({ "current_password": "pw12345678", "new_password": "newpass12345" })),
        Some(&access),
    )
    .await;
    assert_eq!(changed.status, StatusCode::OK);

    let stale = refresh(&app, &old_refresh).await;
    assert_eq!(stale.status, StatusCode::UNAUTHORIZED);
    assert_eq!(stale.code(), "ERR_AUTH_REFRESH_TOKEN_INVALID");

    assert_eq!(
        login(&app, "alice", "newpass12345").await.status,
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_logout_and_logout_all() {
    let (app, _dir) = test_app();
    register(&app, "alice", "alice@example.com", "pw12345678").await;
    let first = login(&app, "alice", "pw12345678").await;
    let second = login(&app, "alice", "pw12345678").await;
    let access = first.body["access_token"].as_str().unwrap().to_string();
    let first_refresh = first.body["refresh_token"].as_str().unwrap().to_string();
    let second_refresh = second.body["refresh_token"].as_str().unwrap().to_string();

    let out = send(
        &app,
        Method::POST,
        "/auth/logout",
        Some(json!({ "refresh_token": first_refresh })),
        Some(&access),
    )
    .await;
    assert_eq!(out.status, StatusCode::OK);

    // Logging out twice is still fine
    let again = send(
        &app,
        Method::POST,
        "/auth/logout",
        Some(json!({ "refresh_token": first_refresh })),
        Some(&access),
    )
    .await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(
        refresh(&app, &first_refresh).await.status,
        StatusCode::UNAUTHORIZED
    );

    let all = send(&app, Method::POST, "/auth/logout-all", None, Some(&access)).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.body["revoked"], 1);
    assert_eq!(
        refresh(&app, &second_refresh).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_update_profile() {
    let (app, _dir) = test_app();
    register(&app, "alice", "alice@example.com", "pw12345678").await;
    register(&app, "bob", "bob@example.com", "pw12345678").await;
    let session = login(&app, "alice", "pw12345678").await;
    let access = session.body["access_token"].as_str().unwrap().to_string();

    let updated = send(
        &app,
        Method::PUT,
        "/auth/me",
        Some(json!({ "display_name": "Alice", "bio": "Writes about Rust" })),
        Some(&access),
    )
    .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["display_name"], "Alice");
    assert_eq!(updated.body["username"], "alice");

    let clash = send(
        &app,
        Method::PUT,
        "/auth/me",
        Some(json!({ "email": "BOB@example.com" })),
        Some(&access),
    )
    .await;
    assert_eq!(clash.status, StatusCode::CONFLICT);
    assert_eq!(clash.code(), "ERR_EMAIL_TAKEN");
}

#[tokio::test]
async fn test_login_rate_limit() {
    let (app, _dir) = test_app();

    for i in 0..5 {
        let reply = login(&app, "ghost", "whatever-pass").await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "attempt {}", i + 1);
        assert_eq!(
            reply.headers["X-Rate-Limit-Remaining"],
            (4 - i).to_string().as_str()
        );
    }

    let limited = login(&app, "ghost", "whatever-pass").await;
    assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.code(), "ERR_RATE_LIMIT_EXCEEDED");
    assert_eq!(limited.headers["X-Rate-Limit-Remaining"], "0");
    let reset: u64 = limited.headers["X-Rate-Limit-Reset"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=12).contains(&reset));

    // Other route classes keep their own bucket
    let health = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(health.status, StatusCode::OK);
    let refresh_attempt = refresh(&app, "unknown").await;
    assert_eq!(refresh_attempt.status, StatusCode::UNAUTHORIZED);
}
