//! Service configuration
//!
//! Every option can be given on the command line or through the environment.
//! `.env` files are loaded before parsing, so they feed the same variables.

use clap::{Args, Parser, ValueEnum};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Secret used when `JWT_SECRET` is not set. Start-up warns loudly about it.
pub const DEV_JWT_SECRET: &str = "gatehouse-dev-secret-change-me";

/// Gatehouse - user management API with JWT sessions
#[derive(Parser, Debug, Clone)]
#[command(name = "gatehouse", version)]
#[command(about = "User management API with JWT authentication")]
pub struct AppConfig {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub jwt: JwtConfig,

    #[command(flatten)]
    pub password: PasswordConfig,

    #[command(flatten)]
    pub log: LogConfig,

    #[command(flatten)]
    pub upload: UploadConfig,
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind
    #[arg(long = "host", env = "SERVER_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(long = "port", env = "SERVER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Upper bound on the time spent handling one request
    #[arg(long = "request-timeout-secs", env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[arg(long = "db-path", env = "DB_PATH", default_value = "gatehouse.db")]
    pub path: String,

    /// Insert the admin/admin123 and user/user123 accounts into an empty database
    #[arg(
        long = "seed-demo-users",
        env = "SEED_DEMO_USERS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub seed_demo_users: bool,
}

/// Token signing settings. Built once and handed to [`crate::auth::JwtHandler::new`].
#[derive(Args, Debug, Clone)]
pub struct JwtConfig {
    /// HMAC secret for signing tokens
    #[arg(long = "jwt-secret", env = "JWT_SECRET", default_value = DEV_JWT_SECRET, hide_env_values = true)]
    pub secret: String,

    /// Access token lifetime in seconds
    #[arg(long = "jwt-expiration", env = "JWT_EXPIRATION_TIME", default_value_t = 86_400)]
    pub ttl_seconds: i64,

    /// Refresh token lifetime in seconds
    #[arg(
        long = "jwt-refresh-expiration",
        env = "JWT_REFRESH_EXPIRATION_TIME",
        default_value_t = 604_800
    )]
    pub refresh_ttl_seconds: i64,

    /// Value of the `iss` claim
    #[arg(long = "jwt-issuer", env = "JWT_ISSUER", default_value = "gatehouse")]
    pub issuer: String,
}

impl JwtConfig {
    /// Config with the default lifetimes and issuer.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds: 86_400,
            refresh_ttl_seconds: 604_800,
            issuer: "gatehouse".to_string(),
        }
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.secret == DEV_JWT_SECRET
    }
}

#[derive(Args, Debug, Clone)]
pub struct PasswordConfig {
    /// bcrypt work factor (4..=31)
    #[arg(long = "bcrypt-cost", env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset
    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    pub level: String,

    /// Log line format
    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub format: LogFormat,
}

#[derive(Args, Debug, Clone)]
pub struct UploadConfig {
    /// Directory receiving uploaded files
    #[arg(long = "upload-dir", env = "UPLOAD_DIR", default_value = "uploads")]
    pub dir: PathBuf,

    /// Largest accepted upload in bytes
    #[arg(long = "upload-max-bytes", env = "UPLOAD_MAX_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_bytes: usize,
}

impl UploadConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}
