//! User management endpoints
//!
//! `/api/users/*` is admin-only. `/api/protected/profile` lets any signed-in
//! user read and edit their own profile.

use crate::api::response::{ApiError, ApiJson, ApiPath, ApiQuery, ApiResponse, PageInfo, PageResponse};
use crate::auth::{
    middleware::{auth_middleware, require_roles, AuthUser, RoleGate},
    models::{AdminUpdateUserRequest, UpdateProfileRequest, UserInfo, UserRole, UserStatus},
    service::AuthService,
    user_store::{UserFilter, UserStats},
};
use axum::{extract::State, middleware::from_fn_with_state, routing::get, Router};
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

pub fn router(auth: AuthService) -> Router {
    let jwt = auth.jwt().clone();

    let admin = Router::new()
        .route("/api/users", get(list_users))
        .route("/api/users/stats", get(user_stats))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route_layer(from_fn_with_state(RoleGate::admin_only(), require_roles))
        .route_layer(from_fn_with_state(jwt.clone(), auth_middleware));

    let profile = Router::new()
        .route("/api/protected/profile", get(get_profile).put(update_profile))
        .route_layer(from_fn_with_state(jwt, auth_middleware));

    admin.merge(profile).with_state(auth)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Matches username, email, first or last name
    pub q: Option<String>,
    pub status: Option<UserStatus>,
}

impl ListQuery {
    /// Page numbers start at 1; out-of-range sizes fall back to the default.
    pub fn normalized(&self) -> (u32, u32) {
        let page = self.page.filter(|p| *p >= 1).unwrap_or(1);
        let page_size = self
            .page_size
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        (page, page_size)
    }
}

// ===== Route Handlers =====

/// GET /api/users
async fn list_users(
    State(auth): State<AuthService>,
    ApiQuery(query): ApiQuery<ListQuery>,
) -> Result<PageResponse<UserInfo>, ApiError> {
    let (page, page_size) = query.normalized();
    let filter = UserFilter {
        keyword: query.q.clone(),
        status: query.status,
    };

    let (users, total) = auth.users().list_page(page, page_size, &filter)?;
    let data = users.iter().map(UserInfo::from_user).collect();

    Ok(PageResponse::new(data, PageInfo::new(page, page_size, total)))
}

/// GET /api/users/stats
async fn user_stats(State(auth): State<AuthService>) -> Result<ApiResponse<UserStats>, ApiError> {
    Ok(ApiResponse::ok(auth.users().stats()?))
}

/// GET /api/users/:id
async fn get_user(
    State(auth): State<AuthService>,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<UserInfo>, ApiError> {
    let user = auth
        .users()
        .find_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(format!("user {} not found", id)))?;
    Ok(ApiResponse::ok(UserInfo::from_user(&user)))
}

/// PUT /api/users/:id
async fn update_user(
    State(auth): State<AuthService>,
    admin: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(payload): ApiJson<AdminUpdateUserRequest>,
) -> Result<ApiResponse<UserInfo>, ApiError> {
    payload.validate().map_err(ApiError::Validation)?;

    if id == admin.user_id
        && (payload.role.is_some_and(|r| r != UserRole::Admin)
            || payload.status == Some(UserStatus::Inactive))
    {
        return Err(ApiError::BadRequest(
            "cannot remove your own admin access".to_string(),
        ));
    }

    let mut user = auth
        .users()
        .find_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(format!("user {} not found", id)))?;

    payload.apply(&mut user);
    if !auth.users().save(&user)? {
        return Err(ApiError::NotFound(format!("user {} not found", id)));
    }

    info!(
        "Admin {} updated user {} (role={}, status={})",
        admin.username,
        user.id,
        user.role,
        user.status.as_str()
    );

    let user = auth.current_user(id)?;
    Ok(ApiResponse::ok(UserInfo::from_user(&user)).message("user updated"))
}

/// DELETE /api/users/:id
async fn delete_user(
    State(auth): State<AuthService>,
    admin: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<()>, ApiError> {
    if id == admin.user_id {
        return Err(ApiError::BadRequest(
            "cannot delete your own account".to_string(),
        ));
    }

    if !auth.users().soft_delete(id)? {
        return Err(ApiError::NotFound(format!("user {} not found", id)));
    }

    info!("Admin {} deleted user {}", admin.username, id);
    Ok(ApiResponse::empty("user deleted"))
}

/// GET /api/protected/profile
async fn get_profile(user: AuthUser) -> ApiResponse<AuthUser> {
    ApiResponse::ok(user)
}

/// PUT /api/protected/profile
async fn update_profile(
    State(auth): State<AuthService>,
    caller: AuthUser,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> Result<ApiResponse<UserInfo>, ApiError> {
    payload.validate().map_err(ApiError::Validation)?;

    let mut user = auth.current_user(caller.user_id)?;
    payload.apply(&mut user);
    auth.users().save(&user)?;

    let user = auth.current_user(caller.user_id)?;
    Ok(ApiResponse::ok(UserInfo::from_user(&user)).message("profile updated"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_normalization() {
        assert_eq!(ListQuery::default().normalized(), (1, 10));

        let query = ListQuery {
            page: Some(0),
            page_size: Some(500),
            ..Default::default()
        };
        assert_eq!(query.normalized(), (1, 10));

        let query = ListQuery {
            page: Some(3),
            page_size: Some(100),
            ..Default::default()
        };
        assert_eq!(query.normalized(), (3, 100));
    }
}
