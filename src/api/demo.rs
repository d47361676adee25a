//! Demo endpoints
//!
//! Small request/response showcases: greetings, echo, delays, headers, client
//! IP, cookies, form posts, file upload and arbitrary status codes.

use crate::api::response::{ApiError, ApiForm, ApiJson, ApiQuery, ApiResponse};
use crate::auth::{
    jwt::JwtHandler,
    middleware::{optional_auth_middleware, AuthUser},
    models::is_valid_email,
    user_store::UserStore,
};
use crate::config::UploadConfig;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const ALLOWED_UPLOAD_EXTENSIONS: [&str; 8] =
    ["jpg", "jpeg", "png", "gif", "pdf", "doc", "docx", "txt"];
pub const MAX_DELAY_SECONDS: u64 = 30;

#[derive(Clone)]
pub struct DemoState {
    pub users: Arc<UserStore>,
    pub uploads: Arc<UploadConfig>,
    pub started_at: DateTime<Utc>,
}

pub fn router(state: DemoState, jwt: Arc<JwtHandler>) -> Router {
    // Multipart framing on top of the file itself.
    let upload_limit = state.uploads.max_bytes.saturating_add(64 * 1024);

    let greeting = Router::new()
        .route("/api/hello", get(hello))
        .route_layer(from_fn_with_state(jwt, optional_auth_middleware));

    Router::new()
        .route("/", get(home))
        .route("/health", get(health))
        .route("/api/docs", get(docs))
        .route("/api/data/:id", get(data_by_id))
        .route("/api/form", post(submit_form))
        .route(
            "/api/upload",
            post(upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/echo", get(echo).post(echo))
        .route("/api/delay", get(delay))
        .route("/api/headers", get(headers))
        .route("/api/ip", get(client_ip))
        .route("/api/cookies", get(list_cookies).post(set_cookie))
        .route("/api/status/:code", get(status_code))
        .with_state(state)
        .merge(greeting)
}

// ===== Route Handlers =====

/// GET /
async fn home() -> ApiResponse<Value> {
    ApiResponse::ok(json!({
        "name": "gatehouse",
        "version": env!("CARGO_PKG_VERSION"),
        "framework": "axum",
        "features": [
            "JWT authentication with refresh and logout",
            "role-based access control",
            "user management with soft delete",
            "SQLite persistence",
            "structured request logging",
            "file upload",
        ],
        "docs": "/api/docs",
    }))
    .message("Welcome to gatehouse")
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
    uptime_seconds: i64,
}

/// GET /health
async fn health(State(state): State<DemoState>) -> Response {
    let database_ok = match state.users.ping() {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check database ping failed: {:#}", e);
            false
        }
    };

    let now = Utc::now();
    let body = HealthResponse {
        status: if database_ok { "healthy" } else { "degraded" },
        database: if database_ok { "up" } else { "down" },
        version: env!("CARGO_PKG_VERSION"),
        timestamp: now,
        uptime_seconds: (now - state.started_at).num_seconds(),
    };
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body)).into_response()
}

/// GET /api/docs
async fn docs() -> ApiResponse<Value> {
    let routes = [
        ("GET", "/", "service information", "none"),
        ("GET", "/health", "liveness and database check", "none"),
        ("GET", "/api/docs", "this catalogue", "none"),
        ("GET", "/api/hello?name=", "greeting, uses your username when signed in", "optional"),
        ("GET", "/api/data/:id", "mock record by numeric id", "none"),
        ("POST", "/api/form", "url-encoded form echo", "none"),
        ("POST", "/api/upload", "multipart upload, field `file`", "none"),
        ("GET|POST", "/api/echo", "echo the request back", "none"),
        ("GET", "/api/delay?seconds=", "respond after 0-30 seconds", "none"),
        ("GET", "/api/headers", "request headers", "none"),
        ("GET", "/api/ip", "client address resolution", "none"),
        ("GET|POST", "/api/cookies", "list or set cookies", "none"),
        ("GET", "/api/status/:code", "respond with a given status code", "none"),
        ("POST", "/api/auth/login", "username or email + password", "none"),
        ("POST", "/api/auth/register", "create an account", "none"),
        ("POST", "/api/auth/refresh", "new access token from an old token", "bearer"),
        ("GET", "/api/auth/validate", "check a token against the live account", "bearer"),
        ("POST", "/api/auth/logout", "revoke the current token", "required"),
        ("GET", "/api/auth/info", "current account", "required"),
        ("POST", "/api/auth/change-password", "change own password", "required"),
        ("GET|PUT", "/api/protected/profile", "own profile", "required"),
        ("GET", "/api/users", "paginated user list, ?page&page_size&q&status", "admin"),
        ("GET", "/api/users/stats", "user counts", "admin"),
        ("GET|PUT|DELETE", "/api/users/:id", "read, edit or delete a user", "admin"),
    ];

    let routes: Vec<Value> = routes
        .iter()
        .map(|(method, path, description, auth)| {
            json!({ "method": method, "path": path, "description": description, "auth": auth })
        })
        .collect();

    ApiResponse::ok(json!({ "routes": routes }))
}

#[derive(Debug, Deserialize)]
struct HelloQuery {
    name: Option<String>,
}

/// GET /api/hello
async fn hello(
    user: Option<AuthUser>,
    ApiQuery(query): ApiQuery<HelloQuery>,
) -> ApiResponse<Value> {
    let name = query
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .or_else(|| user.as_ref().map(|u| u.username.clone()))
        .unwrap_or_else(|| "guest".to_string());

    ApiResponse::ok(json!({
        "greeting": format!("Hello, {}!", name),
        "authenticated": user.is_some(),
        "timestamp": Utc::now(),
    }))
}

/// GET /api/data/:id
async fn data_by_id(Path(id): Path<String>) -> Result<ApiResponse<Value>, ApiError> {
    let id: u64 = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("id must be a positive number, got '{}'", id)))?;

    Ok(ApiResponse::ok(json!({
        "id": id,
        "name": format!("Item {}", id),
        "description": format!("Mock record number {}", id),
        "tags": ["demo", if id % 2 == 0 { "even" } else { "odd" }],
        "created_at": Utc::now(),
    })))
}

#[derive(Debug, Deserialize, Serialize)]
struct ContactForm {
    name: String,
    email: String,
    age: Option<u32>,
    comment: Option<String>,
}

/// POST /api/form
async fn submit_form(ApiForm(form): ApiForm<ContactForm>) -> Result<ApiResponse<Value>, ApiError> {
    let mut errors = BTreeMap::new();
    if form.name.trim().is_empty() {
        errors.insert("name".to_string(), "name is required".to_string());
    }
    if !is_valid_email(&form.email) {
        errors.insert("email".to_string(), "invalid email address".to_string());
    }
    if form.age.is_some_and(|age| age > 150) {
        errors.insert("age".to_string(), "age must be at most 150".to_string());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    Ok(ApiResponse::ok(json!({ "form": form, "received_at": Utc::now() }))
        .message("form received"))
}

#[derive(Debug, Serialize)]
struct UploadedFile {
    original_name: String,
    stored_name: String,
    content_type: Option<String>,
    size: usize,
}

/// POST /api/upload
async fn upload(
    State(state): State<DemoState>,
    mut multipart: Multipart,
) -> Result<ApiResponse<UploadedFile>, ApiError> {
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("file field has no file name".to_string()))?;
        let extension = allowed_extension(&original_name).ok_or_else(|| {
            ApiError::BadRequest(format!(
                "file type not allowed, accepted: {}",
                ALLOWED_UPLOAD_EXTENSIONS.join(", ")
            ))
        })?;
        let content_type = field.content_type().map(str::to_string);

        let mut contents = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            if contents.len() + chunk.len() > state.uploads.max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "file exceeds {} bytes",
                    state.uploads.max_bytes
                )));
            }
            contents.extend_from_slice(&chunk);
        }

        let stored_name = format!("{}.{}", Uuid::new_v4().simple(), extension);
        tokio::fs::create_dir_all(&state.uploads.dir)
            .await
            .map_err(|e| anyhow::Error::new(e).context("Failed to create upload directory"))?;
        tokio::fs::write(state.uploads.dir.join(&stored_name), &contents)
            .await
            .map_err(|e| anyhow::Error::new(e).context("Failed to store upload"))?;

        info!(
            "Stored upload {} as {} ({} bytes)",
            original_name,
            stored_name,
            contents.len()
        );

        return Ok(ApiResponse::ok(UploadedFile {
            original_name,
            stored_name,
            content_type,
            size: contents.len(),
        })
        .message("upload successful"));
    }

    Err(ApiError::BadRequest("missing multipart field 'file'".to_string()))
}

/// Lower-cased extension of `file_name` when it is on the whitelist.
fn allowed_extension(file_name: &str) -> Option<String> {
    let extension = std::path::Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    ALLOWED_UPLOAD_EXTENSIONS
        .contains(&extension.as_str())
        .then_some(extension)
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// GET|POST /api/echo
async fn echo(
    method: Method,
    uri: Uri,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    ApiQuery(query): ApiQuery<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResponse<Value> {
    ApiResponse::ok(json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": query,
        "headers": header_map(&headers),
        "remote_addr": connect_info.map(|ConnectInfo(addr)| addr.to_string()),
        "user_agent": header_str(&headers, "user-agent"),
        "content_type": header_str(&headers, "content-type"),
        "content_length": body.len(),
        "body": String::from_utf8_lossy(&body),
    }))
}

#[derive(Debug, Deserialize)]
struct DelayQuery {
    seconds: Option<String>,
}

/// Requested delay when it is a whole number of seconds in 0..=30, otherwise 1.
fn delay_seconds(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|s| *s <= MAX_DELAY_SECONDS)
        .unwrap_or(1)
}

/// GET /api/delay
async fn delay(ApiQuery(query): ApiQuery<DelayQuery>) -> ApiResponse<Value> {
    let seconds = delay_seconds(query.seconds.as_deref());
    let started_at = Utc::now();
    tokio::time::sleep(Duration::from_secs(seconds)).await;

    ApiResponse::ok(json!({
        "delayed_seconds": seconds,
        "started_at": started_at,
        "finished_at": Utc::now(),
    }))
}

/// GET /api/headers
async fn headers(headers: HeaderMap) -> ApiResponse<BTreeMap<String, String>> {
    ApiResponse::ok(header_map(&headers))
}

/// Client IP: first X-Forwarded-For hop, then X-Real-IP, then the socket peer.
fn resolve_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip").map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// GET /api/ip
async fn client_ip(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> ApiResponse<Value> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    ApiResponse::ok(json!({
        "remote_addr": peer.map(|addr| addr.to_string()),
        "x_real_ip": header_str(&headers, "x-real-ip"),
        "x_forwarded_for": header_str(&headers, "x-forwarded-for"),
        "client_ip": resolve_client_ip(&headers, peer),
    }))
}

/// GET /api/cookies
async fn list_cookies(jar: CookieJar) -> ApiResponse<BTreeMap<String, String>> {
    let cookies = jar
        .iter()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect();
    ApiResponse::ok(cookies)
}

#[derive(Debug, Deserialize)]
struct SetCookieRequest {
    name: String,
    value: String,
}

fn is_cookie_token(s: &str, allow_empty: bool) -> bool {
    (allow_empty || !s.is_empty())
        && s.bytes()
            .all(|b| b.is_ascii_graphic() && !matches!(b, b';' | b',' | b'"' | b'\\' | b'='))
}

/// POST /api/cookies
async fn set_cookie(
    jar: CookieJar,
    ApiJson(payload): ApiJson<SetCookieRequest>,
) -> Result<(CookieJar, ApiResponse<Value>), ApiError> {
    if !is_cookie_token(&payload.name, false) || !is_cookie_token(&payload.value, true) {
        return Err(ApiError::BadRequest(
            "cookie name and value must be printable ASCII without ; , \" \\ =".to_string(),
        ));
    }

    let cookie = Cookie::build((payload.name.clone(), payload.value.clone()))
        .path("/")
        .http_only(true)
        .build();

    Ok((
        jar.add(cookie),
        ApiResponse::ok(json!({ "name": payload.name, "value": payload.value }))
            .message("cookie set"),
    ))
}

/// GET /api/status/:code
async fn status_code(Path(code): Path<String>) -> ApiResponse<Value> {
    let status = code
        .parse::<u16>()
        .ok()
        .filter(|c| (200..=599).contains(c))
        .and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(StatusCode::OK);

    ApiResponse::with_status(
        status,
        status.canonical_reason().unwrap_or("custom status"),
        json!({ "requested": code, "status": status.as_u16() }),
    )
}
