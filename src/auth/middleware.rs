//! Authentication Middleware
//! Guard routes with bearer tokens and role checks

use crate::auth::{
    jwt::{JwtHandler, TokenError, VerifiedClaims},
    models::UserRole,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identity of the caller, attached to the request by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthUser {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
    pub token_id: String,
    pub expires_at: i64,
}

impl From<&VerifiedClaims> for AuthUser {
    fn from(claims: &VerifiedClaims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username.clone(),
            role: claims.role,
            token_id: claims.jti.clone(),
            expires_at: claims.exp,
        }
    }
}

/// Handlers behind the required gate take `user: AuthUser`; optional routes
/// take `Option<AuthUser>`.
#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat)?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidFormat)?
        .trim();

    if token.is_empty() {
        return Err(AuthError::InvalidFormat);
    }
    Ok(token)
}

/// Auth middleware that validates access tokens
pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = bearer_token(req.headers())?;

    let claims = jwt_handler.validate(token).map_err(|e| {
        debug!("Rejected token on {}: {}", req.uri().path(), e);
        AuthError::InvalidToken(e)
    })?;

    let user = AuthUser::from(&claims);
    req.extensions_mut().insert(user);
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Optional auth middleware - never rejects, attaches identity when a valid token is present
pub async fn optional_auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Response {
    let claims = bearer_token(req.headers())
        .ok()
        .and_then(|token| jwt_handler.validate(token).ok());

    if let Some(claims) = claims {
        let user = AuthUser::from(&claims);
        req.extensions_mut().insert(user);
        req.extensions_mut().insert(claims);
    }

    next.run(req).await
}

/// Roles allowed through [`require_roles`]
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Arc<[UserRole]>,
}

impl RoleGate {
    fn new(allowed: &[UserRole]) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }

    pub fn admin_only() -> Self {
        Self::new(&[UserRole::Admin])
    }

    pub fn permits(&self, role: UserRole) -> bool {
        self.allowed.contains(&role)
    }
}

/// Role middleware. Must run after [`auth_middleware`].
pub async fn require_roles(
    State(gate): State<RoleGate>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let user = extract_user(&req).ok_or(AuthError::MissingIdentity)?;

    if !gate.permits(user.role) {
        warn!(
            "User {} ({}) denied {} {}",
            user.username,
            user.role,
            req.method(),
            req.uri().path()
        );
        return Err(AuthError::InsufficientRole);
    }

    Ok(next.run(req).await)
}

/// Extract the caller from a request (use after auth middleware)
pub fn extract_user(req: &Request) -> Option<&AuthUser> {
    req.extensions().get::<AuthUser>()
}

/// Auth error types
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidFormat,
    InvalidToken(TokenError),
    MissingIdentity,
    InsufficientRole,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingToken | AuthError::InvalidFormat | AuthError::InvalidToken(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::MissingIdentity | AuthError::InsufficientRole => StatusCode::FORBIDDEN,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "missing authorization token"),
            AuthError::InvalidFormat => {
                write!(f, "invalid authorization format, expected: Bearer <token>")
            }
            AuthError::InvalidToken(e) => write!(f, "invalid token: {}", e),
            AuthError::MissingIdentity => write!(f, "unable to determine user role"),
            AuthError::InsufficientRole => write!(f, "insufficient permissions"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "code": status.as_u16(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
