//! Authentication Module
//! Password hashing, JWT sessions, the bearer-token gate and account storage

pub mod api;
pub mod denylist;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod service;
pub mod user_store;

pub use jwt::{JwtHandler, TokenError, TokenKind, UnverifiedClaims, VerifiedClaims};
pub use middleware::{auth_middleware, optional_auth_middleware, require_roles, AuthUser, RoleGate};
pub use password::PasswordHasher;
pub use service::AuthService;
pub use user_store::UserStore;
