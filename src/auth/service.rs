//! Session flows on top of the store, hasher and token handler
//!
//! Nothing here knows about HTTP. Handlers map [`ServiceError`] onto
//! responses.

use crate::api::response::FieldErrors;
use crate::auth::{
    jwt::{IssuedToken, JwtHandler, TokenError, VerifiedClaims},
    models::{
        ChangePasswordRequest, LoginRequest, RefreshResponse, RegisterRequest, SessionResponse,
        User, UserInfo, UserRole, UserStatus,
    },
    password::PasswordHasher,
    user_store::{NewUser, StoreError, UserStore},
};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug)]
pub enum ServiceError {
    Validation(FieldErrors),
    InvalidCredentials,
    AccountDisabled,
    /// Token failed verification
    InvalidSession(TokenError),
    /// Token was fine but its user is gone or disabled
    AccountUnavailable,
    UserNotFound,
    UsernameTaken,
    EmailTaken,
    WrongPassword,
    Internal(anyhow::Error),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(errors) => write!(f, "validation failed: {:?}", errors),
            ServiceError::InvalidCredentials => write!(f, "invalid username or password"),
            ServiceError::AccountDisabled => write!(f, "account is disabled"),
            ServiceError::InvalidSession(e) => write!(f, "invalid token: {}", e),
            ServiceError::AccountUnavailable => write!(f, "user not found or disabled"),
            ServiceError::UserNotFound => write!(f, "user not found"),
            ServiceError::UsernameTaken => write!(f, "username already exists"),
            ServiceError::EmailTaken => write!(f, "email already exists"),
            ServiceError::WrongPassword => write!(f, "old password is incorrect"),
            ServiceError::Internal(e) => write!(f, "internal error: {:#}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(err)
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameTaken => ServiceError::UsernameTaken,
            StoreError::EmailTaken => ServiceError::EmailTaken,
            StoreError::Database(e) => ServiceError::Internal(e),
        }
    }
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) => ServiceError::Internal(anyhow::anyhow!(e)),
            other => ServiceError::InvalidSession(other),
        }
    }
}

/// Login, registration and token lifecycle
#[derive(Clone)]
pub struct AuthService {
    users: Arc<UserStore>,
    jwt: Arc<JwtHandler>,
    hasher: PasswordHasher,
}

impl AuthService {
    pub fn new(users: Arc<UserStore>, jwt: Arc<JwtHandler>, hasher: PasswordHasher) -> Self {
        Self { users, jwt, hasher }
    }

    pub fn users(&self) -> &Arc<UserStore> {
        &self.users
    }

    pub fn jwt(&self) -> &Arc<JwtHandler> {
        &self.jwt
    }

    // bcrypt is CPU bound, keep it off the async workers.
    async fn hash_password(&self, plaintext: String) -> anyhow::Result<String> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .context("Password hashing task failed")?
    }

    async fn verify_password(&self, plaintext: String, digest: String) -> anyhow::Result<bool> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &digest))
            .await
            .context("Password verification task failed")
    }

    /// Create an active account with the `user` role.
    pub async fn register(&self, req: RegisterRequest) -> Result<User, ServiceError> {
        req.validate().map_err(ServiceError::Validation)?;

        if self.users.username_taken(&req.username)? {
            return Err(ServiceError::UsernameTaken);
        }
        if self.users.email_taken(&req.email)? {
            return Err(ServiceError::EmailTaken);
        }

        let password_hash = self.hash_password(req.password).await?;
        let user = self.users.create_user(NewUser {
            username: req.username,
            email: req.email,
            password_hash,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            role: UserRole::User,
            status: UserStatus::Active,
        })?;

        info!("Registered user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Check credentials and hand out an access/refresh pair.
    ///
    /// Disabled accounts are refused before the password is looked at.
    pub async fn login(&self, req: LoginRequest) -> Result<SessionResponse, ServiceError> {
        req.validate().map_err(ServiceError::Validation)?;

        let Some(user) = self.users.find_by_login(&req.username)? else {
            warn!("Failed login attempt for unknown user {}", req.username);
            return Err(ServiceError::InvalidCredentials);
        };

        if !user.is_active() {
            warn!("Login refused for disabled user {} ({})", user.username, user.id);
            return Err(ServiceError::AccountDisabled);
        }

        if !self
            .verify_password(req.password, user.password_hash.clone())
            .await?
        {
            warn!("Failed login attempt for {} ({})", user.username, user.id);
            return Err(ServiceError::InvalidCredentials);
        }

        let access = self.jwt.issue(user.id, &user.username, user.role)?;
        let refresh = self.jwt.issue_refresh(user.id, &user.username, user.role)?;

        if let Err(e) = self.users.touch_last_login(user.id) {
            warn!("Could not record last login for {}: {:#}", user.id, e);
        }

        info!("Login successful: {} ({})", user.username, user.role);

        Ok(SessionResponse {
            token: access.token.clone(),
            refresh_token: refresh.token,
            token_type: TOKEN_TYPE.to_string(),
            expires_at: access.expires_at,
            expires_in: access.lifetime(),
            user: UserInfo::from_user(&user),
        })
    }

    /// Trade a correctly signed token, expired or not, for a fresh access token.
    ///
    /// The new token is built from the live user record, so role changes and
    /// deactivation take effect here.
    pub fn refresh(&self, token: &str) -> Result<RefreshResponse, ServiceError> {
        let identity = self.jwt.recover_identity(token).map_err(|e| {
            warn!("Refresh refused: {}", e);
            ServiceError::from(e)
        })?;

        let user = self
            .users
            .find_by_id(identity.user_id())?
            .filter(User::is_active)
            .ok_or_else(|| {
                warn!(
                    "Refresh refused for user {}: missing or disabled",
                    identity.user_id()
                );
                ServiceError::AccountUnavailable
            })?;

        let issued: IssuedToken = self.jwt.issue(user.id, &user.username, user.role)?;
        info!(
            "Refreshed token for {} ({}) from {} token {} issued at {}, expired: {}",
            user.username,
            user.id,
            identity.token_type().as_str(),
            identity.token_id(),
            identity.issued_at(),
            identity.is_expired()
        );

        Ok(RefreshResponse {
            token: issued.token.clone(),
            token_type: TOKEN_TYPE.to_string(),
            expires_at: issued.expires_at,
            expires_in: issued.lifetime(),
        })
    }

    /// Revoke the presented access token, plus the caller's refresh token when given.
    pub fn logout(&self, claims: &VerifiedClaims, refresh_token: Option<&str>) {
        self.jwt.revoke(claims);

        if let Some(token) = refresh_token {
            match self.jwt.validate_refresh(token) {
                Ok(refresh) if refresh.user_id == claims.user_id => self.jwt.revoke(&refresh),
                Ok(_) => warn!("Ignoring refresh token of another user on logout"),
                Err(e) => warn!("Ignoring unusable refresh token on logout: {}", e),
            }
        }

        info!("Logout: {} ({})", claims.username, claims.user_id);
    }

    pub async fn change_password(
        &self,
        user_id: i64,
        req: ChangePasswordRequest,
    ) -> Result<(), ServiceError> {
        req.validate().map_err(ServiceError::Validation)?;

        let user = self.current_user(user_id)?;
        if !self
            .verify_password(req.old_password, user.password_hash.clone())
            .await?
        {
            warn!("Password change refused for {}: wrong old password", user.id);
            return Err(ServiceError::WrongPassword);
        }

        let password_hash = self.hash_password(req.new_password).await?;
        if !self.users.update_password(user.id, &password_hash)? {
            return Err(ServiceError::UserNotFound);
        }

        info!("Password changed for {} ({})", user.username, user.id);
        Ok(())
    }

    pub fn current_user(&self, user_id: i64) -> Result<User, ServiceError> {
        self.users
            .find_by_id(user_id)?
            .ok_or(ServiceError::UserNotFound)
    }

    /// Full token check plus a look at the live account behind it.
    pub fn validate_session(&self, token: &str) -> Result<(VerifiedClaims, User), ServiceError> {
        let claims = self.jwt.validate(token)?;
        let user = self
            .users
            .find_by_id(claims.user_id)?
            .filter(User::is_active)
            .ok_or(ServiceError::AccountUnavailable)?;
        Ok((claims, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::TokenKind;
    use crate::config::JwtConfig;
    use chrono::{Duration, Utc};
    use tempfile::NamedTempFile;

    fn service() -> (AuthService, NamedTempFile) {
        service_with(JwtConfig::new("service-test-secret"))
    }

    fn service_with(jwt_config: JwtConfig) -> (AuthService, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let users = Arc::new(UserStore::new(temp_file.path().to_str().unwrap()).unwrap());
        let hasher = PasswordHasher::new(4);
        users.seed_demo_users(&hasher).unwrap();
        let jwt = Arc::new(JwtHandler::new(jwt_config));
        (AuthService::new(users, jwt, hasher), temp_file)
    }

    fn login_req(username: &str, password: &str) -> LoginRequest {
        LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    fn register_req(username: &str, email: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: "secret123".to_string(),
            first_name: "New".to_string(),
            last_name: "Person".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_active_user() {
        let (service, _temp) = service();

        let session = service.login(login_req("admin", "admin123")).await.unwrap();
        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.expires_in, 86_400);

        let claims = service.jwt().validate(&session.token).unwrap();
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.role, UserRole::Admin);
        assert_eq!(claims.user_id, session.user.id);

        let refresh = service.jwt().validate_refresh(&session.refresh_token).unwrap();
        assert_eq!(refresh.token_type, TokenKind::Refresh);

        let user = service.current_user(session.user.id).unwrap();
        assert!(user.last_login.is_some());
    }

    #[tokio::test]
    async fn test_login_by_email() {
        let (service, _temp) = service();
        let session = service
            .login(login_req("user@example.com", "user123"))
            .await
            .unwrap();
        assert_eq!(session.user.username, "user");
    }

    #[tokio::test]
    async fn test_login_wrong_password_or_unknown_user() {
        let (service, _temp) = service();

        assert!(matches!(
            service.login(login_req("admin", "nope")).await,
            Err(ServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            service.login(login_req("ghost", "admin123")).await,
            Err(ServiceError::InvalidCredentials)
        ));
        assert!(matches!(
            service.login(login_req("", "")).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_inactive_user_rejected() {
        let (service, _temp) = service();
        let mut user = service.users().find_by_login("user").unwrap().unwrap();
        user.status = UserStatus::Inactive;
        service.users().save(&user).unwrap();

        // Correct password, still refused.
        assert!(matches!(
            service.login(login_req("user", "user123")).await,
            Err(ServiceError::AccountDisabled)
        ));
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (service, _temp) = service();

        let user = service
            .register(register_req("newbie", "newbie@example.com"))
            .await
            .unwrap();
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.status, UserStatus::Active);
        assert_ne!(user.password_hash, "secret123");

        let session = service.login(login_req("newbie", "secret123")).await.unwrap();
        assert_eq!(session.user.id, user.id);
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let (service, _temp) = service();

        assert!(matches!(
            service.register(register_req("admin", "fresh@example.com")).await,
            Err(ServiceError::UsernameTaken)
        ));
        assert!(matches!(
            service.register(register_req("fresh", "admin@example.com")).await,
            Err(ServiceError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_with_expired_token() {
        let (service, _temp) = service();
        let user = service.users().find_by_login("user").unwrap().unwrap();
        let expired = service
            .jwt()
            .issue_at(
                TokenKind::Access,
                user.id,
                &user.username,
                user.role,
                Utc::now() - Duration::hours(30),
            )
            .unwrap();

        let refreshed = service.refresh(&expired.token).unwrap();
        let claims = service.jwt().validate(&refreshed.token).unwrap();
        assert_eq!(claims.user_id, user.id);
    }

    #[tokio::test]
    async fn test_refresh_uses_live_role() {
        let (service, _temp) = service();
        let mut user = service.users().find_by_login("user").unwrap().unwrap();
        let old = service.jwt().issue(user.id, &user.username, user.role).unwrap();

        user.role = UserRole::Admin;
        service.users().save(&user).unwrap();

        let refreshed = service.refresh(&old.token).unwrap();
        let claims = service.jwt().validate(&refreshed.token).unwrap();
        assert_eq!(claims.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_refresh_deleted_user_rejected() {
        let (service, _temp) = service();
        let user = service.users().find_by_login("user").unwrap().unwrap();
        let expired = service
            .jwt()
            .issue_at(
                TokenKind::Access,
                user.id,
                &user.username,
                user.role,
                Utc::now() - Duration::hours(30),
            )
            .unwrap();
        service.users().soft_delete(user.id).unwrap();

        assert!(matches!(
            service.refresh(&expired.token),
            Err(ServiceError::AccountUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_refresh_forged_token_rejected() {
        let (service, _temp) = service();
        let forged = JwtHandler::new(JwtConfig::new("attacker"))
            .issue(1, "admin", UserRole::Admin)
            .unwrap();

        assert!(matches!(
            service.refresh(&forged.token),
            Err(ServiceError::InvalidSession(TokenError::InvalidSignature))
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_both_tokens() {
        let (service, _temp) = service();
        let session = service.login(login_req("user", "user123")).await.unwrap();
        let claims = service.jwt().validate(&session.token).unwrap();

        service.logout(&claims, Some(&session.refresh_token));

        assert_eq!(
            service.jwt().validate(&session.token).unwrap_err(),
            TokenError::Revoked
        );
        assert!(matches!(
            service.refresh(&session.refresh_token),
            Err(ServiceError::InvalidSession(TokenError::Revoked))
        ));
    }

    #[tokio::test]
    async fn test_logged_out_token_stays_dead_after_expiry() {
        let mut jwt_config = JwtConfig::new("service-test-secret");
        jwt_config.ttl_seconds = 1;
        let (service, _temp) = service_with(jwt_config);

        let session = service.login(login_req("user", "user123")).await.unwrap();
        let claims = service.jwt().validate(&session.token).unwrap();
        service.logout(&claims, None);
        assert!(matches!(
            service.refresh(&session.token),
            Err(ServiceError::InvalidSession(TokenError::Revoked))
        ));

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert!(service.jwt().validate(&session.token).is_err());

        // Another logout sweeps expired revocations.
        let admin = service.login(login_req("admin", "admin123")).await.unwrap();
        let admin_claims = service.jwt().validate(&admin.token).unwrap();
        service.logout(&admin_claims, None);

        assert!(matches!(
            service.refresh(&session.token),
            Err(ServiceError::InvalidSession(TokenError::Revoked))
        ));
    }

    #[tokio::test]
    async fn test_change_password() {
        let (service, _temp) = service();
        let user = service.users().find_by_login("user").unwrap().unwrap();

        let wrong = ChangePasswordRequest {
            old_password: "bad".into(),
            new_password: "brandnew".into(),
        };
        assert!(matches!(
            service.change_password(user.id, wrong).await,
            Err(ServiceError::WrongPassword)
        ));

        let right = ChangePasswordRequest {
            old_password: "user123".into(),
            new_password: "brandnew".into(),
        };
        service.change_password(user.id, right).await.unwrap();

        assert!(service.login(login_req("user", "user123")).await.is_err());
        assert!(service.login(login_req("user", "brandnew")).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_session_checks_live_user() {
        let (service, _temp) = service();
        let session = service.login(login_req("user", "user123")).await.unwrap();

        let (claims, user) = service.validate_session(&session.token).unwrap();
        assert_eq!(claims.user_id, user.id);

        let mut user = user;
        user.status = UserStatus::Inactive;
        service.users().save(&user).unwrap();
        assert!(matches!(
            service.validate_session(&session.token),
            Err(ServiceError::AccountUnavailable)
        ));
    }
}
