//! Gatehouse - user management API with JWT sessions

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gatehouse_backend::{
    api::create_router,
    auth::{AuthService, JwtHandler, PasswordHasher, UserStore},
    config::{AppConfig, LogConfig, LogFormat},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment first so clap sees .env values
    load_env();
    let config = AppConfig::parse();
    init_tracing(&config.log);

    info!("Gatehouse {} starting", env!("CARGO_PKG_VERSION"));
    if config.jwt.uses_dev_secret() {
        warn!("JWT_SECRET not set, signing tokens with the built-in development secret");
    }

    let hasher = PasswordHasher::new(config.password.bcrypt_cost);
    info!("Password hashing: bcrypt cost {}", hasher.cost());
    let users = Arc::new(
        UserStore::new(&config.database.path)
            .with_context(|| format!("Failed to open user store at {}", config.database.path))?,
    );
    info!("User store ready at {}", config.database.path);

    if config.database.seed_demo_users {
        let seeded = users.seed_demo_users(&hasher)?;
        if seeded == 0 {
            info!("Existing users found, demo seeding skipped");
        }
    }

    let jwt = Arc::new(JwtHandler::new(config.jwt.clone()));
    info!(
        "JWT sessions: access {}s, refresh {}s, issuer {}",
        config.jwt.ttl_seconds, config.jwt.refresh_ttl_seconds, config.jwt.issuer
    );

    let auth = AuthService::new(users, jwt, hasher);
    let app = create_router(
        auth,
        config.upload.clone(),
        config.server.request_timeout(),
    );

    let addr = config.server.addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Initialize tracing. `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also the crate's own .env when started from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
