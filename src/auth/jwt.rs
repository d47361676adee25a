//! JWT Token Handler
//! Issue, validate and revoke HMAC-signed session tokens
//!
//! Two trust levels come out of this module. [`VerifiedClaims`] can only be
//! produced by a full check (signature, algorithm family, time window, token
//! kind, denylist). [`UnverifiedClaims`] come from a decode that skipped some
//! of those checks and only expose read accessors.

use crate::auth::denylist::TokenDenylist;
use crate::auth::models::UserRole;
use crate::config::JwtConfig;
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use tracing::debug;
use uuid::Uuid;

/// MAC algorithms accepted on inbound tokens. Anything else is refused.
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
    pub token_type: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub iss: String,
    pub sub: String, // "user:<id>"
    /// `<user_id>_<iat>_<8 hex chars>`; the random tail keeps ids issued in
    /// the same second apart.
    pub jti: String,
}

/// Claims that passed every check in [`JwtHandler::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims(Claims);

impl Deref for VerifiedClaims {
    type Target = Claims;

    fn deref(&self) -> &Claims {
        &self.0
    }
}

/// Claims decoded without the full set of checks. Not usable as an identity.
#[derive(Debug, Clone)]
pub struct UnverifiedClaims {
    claims: Claims,
}

impl UnverifiedClaims {
    pub fn user_id(&self) -> i64 {
        self.claims.user_id
    }

    pub fn username(&self) -> &str {
        &self.claims.username
    }

    pub fn role(&self) -> UserRole {
        self.claims.role
    }

    pub fn token_type(&self) -> TokenKind {
        self.claims.token_type
    }

    pub fn token_id(&self) -> &str {
        &self.claims.jti
    }

    pub fn issued_at(&self) -> i64 {
        self.claims.iat
    }

    pub fn expires_at(&self) -> i64 {
        self.claims.exp
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.expires_at()
    }
}

/// A freshly signed token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub token_id: String,
}

impl IssuedToken {
    pub fn lifetime(&self) -> i64 {
        self.expires_at - self.issued_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Malformed,
    InvalidSignature,
    InvalidAlgorithm,
    InvalidIssuer,
    Expired,
    NotYetValid,
    WrongKind { expected: TokenKind },
    Revoked,
    Signing(String),
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "malformed token"),
            TokenError::InvalidSignature => write!(f, "signature verification failed"),
            TokenError::InvalidAlgorithm => write!(f, "unsupported signing algorithm"),
            TokenError::InvalidIssuer => write!(f, "unexpected issuer"),
            TokenError::Expired => write!(f, "token has expired"),
            TokenError::NotYetValid => write!(f, "token is not yet valid"),
            TokenError::WrongKind { expected } => {
                write!(f, "expected an {} token", expected.as_str())
            }
            TokenError::Revoked => write!(f, "token has been revoked"),
            TokenError::Signing(e) => write!(f, "failed to sign token: {}", e),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotYetValid,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                TokenError::InvalidAlgorithm
            }
            ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
            _ => TokenError::Malformed,
        }
    }
}

/// JWT Handler for token operations
pub struct JwtHandler {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    strict: Validation,
    relaxed: Validation,
    denylist: TokenDenylist,
}

impl JwtHandler {
    pub fn new(config: JwtConfig) -> Self {
        let mut strict = Validation::new(Algorithm::HS256);
        strict.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        strict.leeway = 0;
        strict.validate_exp = true;
        strict.validate_nbf = true;
        strict.validate_aud = false;
        strict.set_required_spec_claims(&["exp", "nbf", "sub", "iss"]);
        strict.set_issuer(&[config.issuer.as_str()]);

        // Signature, algorithm and issuer still checked; the time window is not.
        let mut relaxed = strict.clone();
        relaxed.validate_exp = false;
        relaxed.validate_nbf = false;

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            strict,
            relaxed,
            denylist: TokenDenylist::new(),
            config,
        }
    }

    /// Issue an access token valid from now for the configured lifetime.
    pub fn issue(
        &self,
        user_id: i64,
        username: &str,
        role: UserRole,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenKind::Access, user_id, username, role, Utc::now())
    }

    /// Issue a refresh token valid from now for the refresh lifetime.
    pub fn issue_refresh(
        &self,
        user_id: i64,
        username: &str,
        role: UserRole,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(TokenKind::Refresh, user_id, username, role, Utc::now())
    }

    /// Issue a token as if the clock read `now`.
    pub fn issue_at(
        &self,
        kind: TokenKind,
        user_id: i64,
        username: &str,
        role: UserRole,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.config.ttl_seconds,
            TokenKind::Refresh => self.config.refresh_ttl_seconds,
        }
        .max(1);

        let iat = now.timestamp();
        let exp = iat
            .checked_add(ttl)
            .ok_or_else(|| TokenError::Signing(format!("token lifetime of {}s is too large", ttl)))?;
        let claims = Claims {
            user_id,
            username: username.to_string(),
            role,
            token_type: kind,
            iat,
            exp,
            nbf: iat,
            iss: self.config.issuer.clone(),
            sub: format!("user:{}", user_id),
            jti: format!("{}_{}_{}", user_id, iat, &Uuid::new_v4().simple().to_string()[..8]),
        };

        debug!(
            "Issuing {} token for user {} ({}), expires in {}s",
            kind.as_str(),
            username,
            user_id,
            ttl
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            issued_at: iat,
            expires_at: claims.exp,
            token_id: claims.jti,
        })
    }

    /// Full check of an access token.
    pub fn validate(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        self.validate_kind(token, TokenKind::Access)
    }

    /// Full check of a refresh token.
    pub fn validate_refresh(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        self.validate_kind(token, TokenKind::Refresh)
    }

    fn validate_kind(&self, token: &str, expected: TokenKind) -> Result<VerifiedClaims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.strict)?.claims;

        if claims.token_type != expected {
            return Err(TokenError::WrongKind { expected });
        }
        if self.denylist.is_revoked(&claims.jti) {
            return Err(TokenError::Revoked);
        }

        debug!("Validated {} token for user {}", expected.as_str(), claims.username);

        Ok(VerifiedClaims(claims))
    }

    /// Decode the claims with no signature, algorithm or time checks.
    pub fn parse_unverified(&self, token: &str) -> Result<UnverifiedClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)?.claims;
        Ok(UnverifiedClaims { claims })
    }

    /// Identity of a correctly signed token of either kind, ignoring its
    /// `exp`/`nbf` window. Revoked tokens and tokens issued longer ago than
    /// the refresh lifetime are refused.
    pub fn recover_identity(&self, token: &str) -> Result<UnverifiedClaims, TokenError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.relaxed)?.claims;

        if self.denylist.is_revoked(&claims.jti) {
            return Err(TokenError::Revoked);
        }
        if Utc::now().timestamp() > self.refresh_horizon(claims.iat) {
            return Err(TokenError::Expired);
        }

        Ok(UnverifiedClaims { claims })
    }

    /// Last moment a token issued at `iat` can still be traded in for a new one.
    fn refresh_horizon(&self, iat: i64) -> i64 {
        iat.saturating_add(self.config.refresh_ttl_seconds.max(1))
    }

    /// Refuse this token for as long as it can be used anywhere: strict
    /// validation until `exp`, [`Self::recover_identity`] until the refresh horizon.
    pub fn revoke(&self, claims: &VerifiedClaims) {
        let until = claims.exp.max(self.refresh_horizon(claims.iat));
        self.denylist.revoke(&claims.jti, until);
        debug!(
            "Revoked token {} of user {} until {}",
            claims.jti, claims.username, until
        );
    }

    pub fn is_revoked(&self, token_id: &str) -> bool {
        self.denylist.is_revoked(token_id)
    }
}
