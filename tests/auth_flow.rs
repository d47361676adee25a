//! End-to-end tests against the full router with a throwaway database.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use gatehouse_backend::{
    api::{create_router, demo::MAX_DELAY_SECONDS},
    auth::{models::UserRole, AuthService, JwtHandler, PasswordHasher, TokenKind, UserStore},
    config::{JwtConfig, UploadConfig},
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    auth: AuthService,
    dir: TempDir,
}

fn test_app() -> TestApp {
    test_app_with_timeout(Duration::from_secs(60))
}

fn test_app_with_timeout(request_timeout: Duration) -> TestApp {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let hasher = PasswordHasher::new(4);

    let users = Arc::new(UserStore::new(db_path.to_str().unwrap()).unwrap());
    users.seed_demo_users(&hasher).unwrap();
    let jwt = Arc::new(JwtHandler::new(JwtConfig::new("integration-test-secret")));
    let auth = AuthService::new(users, jwt, hasher);

    let mut uploads = UploadConfig::new(dir.path().join("uploads"));
    uploads.max_bytes = 1024;

    let router = create_router(auth.clone(), uploads, request_timeout);
    TestApp { router, auth, dir }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(build(Method::GET, uri, token, None)).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(build(Method::POST, uri, token, Some(body))).await
    }

    async fn put(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(build(Method::PUT, uri, token, Some(body))).await
    }

    async fn login(&self, username: &str, password: &str) -> Value {
        let (status, body) = self
            .post(
                "/api/auth/login",
                None,
                json!({ "username": username, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["data"].clone()
    }

    async fn token_for(&self, username: &str, password: &str) -> String {
        self.login(username, password).await["token"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

fn build(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn login_returns_session_and_identity() {
    let app = test_app();
    let session = app.login("admin", "admin123").await;

    assert_eq!(session["token_type"], "Bearer");
    assert_eq!(session["user"]["username"], "admin");
    assert_eq!(session["user"]["role"], "admin");
    assert!(session["user"].get("password_hash").is_none());
    assert!(session["refresh_token"].is_string());

    let token = session["token"].as_str().unwrap();
    let (status, body) = app.get("/api/auth/info", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["user"]["username"], "admin");
    assert!(body["data"]["user"]["last_login"].is_string());
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let app = test_app();
    let (status, body) = app
        .post(
            "/api/auth/login",
            None,
            json!({ "username": "admin", "password": "nope" }),
        )
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn inactive_user_cannot_log_in() {
    let app = test_app();
    let admin = app.token_for("admin", "admin123").await;
    let user = app.auth.users().find_by_login("user").unwrap().unwrap();

    let (status, _) = app
        .put(
            &format!("/api/users/{}", user.id),
            Some(&admin),
            json!({ "status": "inactive" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post(
            "/api/auth/login",
            None,
            json!({ "username": "user", "password": "user123" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(!body.to_string().contains("token"));
}

#[tokio::test]
async fn admin_routes_require_admin_role() {
    let app = test_app();
    let user = app.token_for("user", "user123").await;
    let admin = app.token_for("admin", "admin123").await;

    let (status, body) = app.get("/api/users", Some(&user)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "insufficient permissions");
    assert!(body.get("page").is_none());

    let (status, _) = app.get("/api/users", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/api/users?page=1&page_size=1", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["page"]["total"], 2);
    assert_eq!(body["page"]["total_page"], 2);

    let (status, body) = app.get("/api/users/stats", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["admins"], 1);
}

#[tokio::test]
async fn refresh_with_expired_token() {
    let app = test_app();
    let user = app.auth.users().find_by_login("user").unwrap().unwrap();
    let expired = app
        .auth
        .jwt()
        .issue_at(
            TokenKind::Access,
            user.id,
            &user.username,
            user.role,
            Utc::now() - ChronoDuration::hours(30),
        )
        .unwrap();

    let (status, _) = app.get("/api/auth/info", Some(&expired.token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(build(Method::POST, "/api/auth/refresh", Some(&expired.token), None))
        .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["data"]["token"].as_str().unwrap();

    let (status, _) = app.get("/api/auth/info", Some(fresh)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn refresh_for_deleted_user_is_rejected() {
    let app = test_app();
    let user = app.auth.users().find_by_login("user").unwrap().unwrap();
    let expired = app
        .auth
        .jwt()
        .issue_at(
            TokenKind::Access,
            user.id,
            &user.username,
            UserRole::User,
            Utc::now() - ChronoDuration::hours(30),
        )
        .unwrap();
    app.auth.users().soft_delete(user.id).unwrap();

    let (status, body) = app
        .send(build(Method::POST, "/api/auth/refresh", Some(&expired.token), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn refresh_token_cannot_open_protected_routes() {
    let app = test_app();
    let session = app.login("user", "user123").await;
    let refresh = session["refresh_token"].as_str().unwrap();

    let (status, body) = app.get("/api/protected/profile", Some(refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("expected an access token"));
}

#[tokio::test]
async fn logout_revokes_token() {
    let app = test_app();
    let session = app.login("user", "user123").await;
    let token = session["token"].as_str().unwrap();
    let refresh = session["refresh_token"].as_str().unwrap();

    let (status, _) = app
        .post(
            "/api/auth/logout",
            Some(token),
            json!({ "refresh_token": refresh }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/auth/info", Some(token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains("revoked"));

    let (status, _) = app
        .send(build(Method::POST, "/api/auth/refresh", Some(refresh), None))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_validation_and_conflicts() {
    let app = test_app();
    let new_user = json!({
        "username": "newbie",
        "email": "newbie@example.com",
        "password": "secret123",
    });

    let (status, body) = app.post("/api/auth/register", None, new_user.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], 201);
    assert_eq!(body["data"]["role"], "user");
    assert_eq!(body["data"]["status"], "active");

    let (status, _) = app.post("/api/auth/register", None, new_user).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post(
            "/api/auth/register",
            None,
            json!({ "username": "x", "email": "bad", "password": "1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"]["username"].is_string());
    assert!(body["errors"]["email"].is_string());
    assert!(body["errors"]["password"].is_string());

    let (status, _) = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_update_and_password_change() {
    let app = test_app();
    let token = app.token_for("user", "user123").await;

    let (status, body) = app.get("/api/protected/profile", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "user");

    let (status, body) = app
        .put(
            "/api/protected/profile",
            Some(&token),
            json!({ "first_name": "Ada", "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["first_name"], "Ada");
    assert_eq!(body["data"]["role"], "user");

    let (status, _) = app
        .post(
            "/api/auth/change-password",
            Some(&token),
            json!({ "old_password": "wrong", "new_password": "newpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/auth/change-password",
            Some(&token),
            json!({ "old_password": "user123", "new_password": "newpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    app.login("user", "newpass1").await;
}

#[tokio::test]
async fn admin_user_management() {
    let app = test_app();
    let admin_token = app.token_for("admin", "admin123").await;
    let admin = app.auth.users().find_by_login("admin").unwrap().unwrap();
    let user = app.auth.users().find_by_login("user").unwrap().unwrap();

    let (status, _) = app
        .send(build(
            Method::DELETE,
            &format!("/api/users/{}", admin.id),
            Some(&admin_token),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(build(
            Method::DELETE,
            &format!("/api/users/{}", user.id),
            Some(&admin_token),
            None,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .get(&format!("/api/users/{}", user.id), Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get("/api/users/not-a-number", Some(&admin_token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn validate_endpoint_checks_live_account() {
    let app = test_app();
    let token = app.token_for("user", "user123").await;

    let (status, body) = app.get("/api/auth/validate", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);

    let user = app.auth.users().find_by_login("user").unwrap().unwrap();
    app.auth.users().soft_delete(user.id).unwrap();

    let (status, _) = app.get("/api/auth/validate", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn hello_uses_optional_identity() {
    let app = test_app();
    let token = app.token_for("user", "user123").await;

    let (status, body) = app.get("/api/hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["greeting"], "Hello, guest!");

    let (_, body) = app.get("/api/hello", Some(&token)).await;
    assert_eq!(body["data"]["greeting"], "Hello, user!");
    assert_eq!(body["data"]["authenticated"], true);

    let (status, body) = app.get("/api/hello?name=Rust", Some("garbage")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["greeting"], "Hello, Rust!");
    assert_eq!(body["data"]["authenticated"], false);
}

#[tokio::test]
async fn demo_endpoints() {
    let app = test_app();

    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "up");

    let (status, body) = app.get("/api/data/42", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], 42);

    let (status, _) = app.get("/api/data/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get("/api/status/418", None).await;
    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body["code"], 418);

    let (status, _) = app.get("/api/status/nope", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/api/delay?seconds=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delayed_seconds"], 0);

    let (status, body) = app.post("/api/echo?x=1", None, json!({"hi": "there"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["method"], "POST");
    assert_eq!(body["data"]["query"]["x"], "1");
    assert!(body["data"]["body"].as_str().unwrap().contains("there"));

    let (status, body) = app.get("/no/such/route", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 404);
}

#[tokio::test(start_paused = true)]
async fn longest_delay_fits_in_default_timeout() {
    let app = test_app();

    let (status, body) = app
        .get(&format!("/api/delay?seconds={}", MAX_DELAY_SECONDS), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["delayed_seconds"], MAX_DELAY_SECONDS);
}

#[tokio::test(start_paused = true)]
async fn timeout_answers_with_json_envelope() {
    let app = test_app_with_timeout(Duration::from_secs(5));

    let (status, body) = app.get("/api/delay?seconds=10", None).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["code"], 408);
    assert_eq!(body["message"], "request timed out");
}

#[tokio::test]
async fn form_and_cookies() {
    let app = test_app();

    let (status, body) = app
        .send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/form")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("name=Ada&email=ada%40example.com&age=36"))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["form"]["age"], 36);

    let response = app
        .router
        .clone()
        .oneshot(build(
            Method::POST,
            "/api/cookies",
            None,
            Some(json!({ "name": "flavor", "value": "oatmeal" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response.headers().get(header::SET_COOKIE).unwrap();
    assert!(set_cookie.to_str().unwrap().starts_with("flavor=oatmeal"));

    let (_, body) = app
        .send(
            Request::builder()
                .uri("/api/cookies")
                .header(header::COOKIE, "a=1; b=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(body["data"]["a"], "1");
    assert_eq!(body["data"]["b"], "2");
}

fn multipart_request(file_name: &str, contents: &[u8]) -> Request<Body> {
    let boundary = "gatehouse-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn upload_stores_whitelisted_files() {
    let app = test_app();

    let (status, body) = app.send(multipart_request("notes.txt", b"hello upload")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["size"], 12);
    let stored = body["data"]["stored_name"].as_str().unwrap();
    let on_disk = std::fs::read(app.dir.path().join("uploads").join(stored)).unwrap();
    assert_eq!(on_disk, b"hello upload");

    let (status, _) = app.send(multipart_request("evil.exe", b"MZ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send(multipart_request("big.txt", &[b'a'; 2048])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
