//! Authentication API Endpoints
//! Login, registration, token refresh and the caller's own account

use crate::api::response::{ApiError, ApiJson, ApiResponse};
use crate::auth::{
    jwt::VerifiedClaims,
    middleware::{auth_middleware, bearer_token, AuthError, AuthUser},
    models::{
        ChangePasswordRequest, LoginRequest, RefreshResponse, RegisterRequest, SessionResponse,
        UserInfo,
    },
    service::{AuthService, ServiceError},
};
use axum::{
    extract::State,
    http::HeaderMap,
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};

/// Routes under `/api/auth`
pub fn router(auth: AuthService) -> Router {
    let public = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/validate", get(validate));

    let protected = Router::new()
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/info", get(info))
        .route("/api/auth/change-password", post(change_password))
        .route_layer(from_fn_with_state(auth.jwt().clone(), auth_middleware));

    public.merge(protected).with_state(auth)
}

// ===== Route Handlers =====

/// POST /api/auth/login
pub async fn login(
    State(auth): State<AuthService>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<ApiResponse<SessionResponse>, ApiError> {
    let session = auth.login(payload).await?;
    Ok(ApiResponse::ok(session).message("login successful"))
}

/// POST /api/auth/register
pub async fn register(
    State(auth): State<AuthService>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<ApiResponse<UserInfo>, ApiError> {
    let user = auth.register(payload).await?;
    Ok(ApiResponse::created(UserInfo::from_user(&user)).message("registration successful"))
}

/// POST /api/auth/refresh - takes the old token as a bearer credential
pub async fn refresh(
    State(auth): State<AuthService>,
    headers: HeaderMap,
) -> Result<ApiResponse<RefreshResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let refreshed = auth.refresh(token)?;
    Ok(ApiResponse::ok(refreshed).message("token refreshed"))
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// POST /api/auth/logout
pub async fn logout(
    State(auth): State<AuthService>,
    Extension(claims): Extension<VerifiedClaims>,
    body: Option<ApiJson<LogoutRequest>>,
) -> ApiResponse<()> {
    let body = body.map(|ApiJson(b)| b).unwrap_or_default();
    auth.logout(&claims, body.refresh_token.as_deref());
    ApiResponse::empty("logout successful")
}

#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
pub struct AccountInfo {
    pub user: UserInfo,
    pub token: TokenInfo,
}

/// GET /api/auth/info
pub async fn info(
    State(auth): State<AuthService>,
    user: AuthUser,
) -> Result<ApiResponse<AccountInfo>, ApiError> {
    let account = auth.current_user(user.user_id)?;
    Ok(ApiResponse::ok(AccountInfo {
        user: UserInfo::from_user(&account),
        token: TokenInfo {
            token_id: user.token_id,
            expires_at: user.expires_at,
        },
    }))
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(auth): State<AuthService>,
    user: AuthUser,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> Result<ApiResponse<()>, ApiError> {
    auth.change_password(user.user_id, payload).await?;
    Ok(ApiResponse::empty("password changed"))
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user_id: i64,
    pub username: String,
    pub role: String,
    pub expires_at: i64,
    pub user: UserInfo,
}

/// GET /api/auth/validate
pub async fn validate(
    State(auth): State<AuthService>,
    headers: HeaderMap,
) -> Result<ApiResponse<ValidateResponse>, ApiError> {
    let token = bearer_token(&headers)?;
    let (claims, user) = auth.validate_session(token)?;
    Ok(ApiResponse::ok(ValidateResponse {
        valid: true,
        user_id: claims.user_id,
        username: claims.username.clone(),
        role: claims.role.to_string(),
        expires_at: claims.exp,
        user: UserInfo::from_user(&user),
    })
    .message("token is valid"))
}

// ===== Error Mapping =====

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Validation(errors) => ApiError::Validation(errors),
            ServiceError::InvalidCredentials
            | ServiceError::InvalidSession(_)
            | ServiceError::AccountUnavailable => ApiError::Unauthorized(message),
            ServiceError::AccountDisabled => ApiError::Forbidden(message),
            ServiceError::UserNotFound => ApiError::NotFound(message),
            ServiceError::UsernameTaken | ServiceError::EmailTaken => ApiError::Conflict(message),
            ServiceError::WrongPassword => ApiError::BadRequest(message),
            ServiceError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::MissingToken | AuthError::InvalidFormat | AuthError::InvalidToken(_) => {
                ApiError::Unauthorized(message)
            }
            AuthError::MissingIdentity | AuthError::InsufficientRole => {
                ApiError::Forbidden(message)
            }
        }
    }
}
