//! Customer Auth Service Server
//!
//! Loads configuration from the environment, wires the store backend and
//! the email worker, and serves every endpoint group.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use dotenv::dotenv;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use customer_auth_service::{
    api::{AppState, RouterBuilder},
    config::{AppConfig, ServerConfig, StorageBackend},
    database::{run_migrations, MemoryStore, PgStore},
    service::{LogMailer, Mailer, SmtpMailer},
    VERSION,
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(15 * 60);
const EMAIL_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    dotenv().ok();

    env_logger::init();

    log::info!("🚀 Starting Customer Auth Service v{}", VERSION);

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    log::info!("✅ Configuration loaded and validated");

    let mailer: Arc<dyn Mailer> = match &config.email.smtp {
        Some(smtp) => {
            log::info!("📧 Sending mail through {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            log::warn!("⚠️  SMTP not configured; outgoing mail is only logged");
            Arc::new(LogMailer)
        }
    };

    let (state, email_worker) = match config.storage {
        StorageBackend::Postgres => {
            let db_config = config
                .database
                .as_ref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let pool = db_config
                .create_pool()
                .await
                .context("Failed to connect to the database")?;

            log::info!("🔄 Running database migrations...");
            run_migrations(&pool).await?;
            log::info!("✅ Database migrations completed");

            AppState::build(&config, Arc::new(PgStore::new(pool)), mailer)?
        }
        StorageBackend::Memory => {
            log::warn!("⚠️  Using the in-memory store; nothing survives a restart");
            AppState::build(&config, Arc::new(MemoryStore::new()), mailer)?
        }
    };

    log::info!("   - Rate limiting: {}", state.rate_limiter.is_enabled());

    let maintenance = tokio::spawn(run_maintenance(state.clone()));

    let app = RouterBuilder::with_all_routes()
        .build(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.server))
                .into_inner(),
        );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    log::info!("🌐 Listening on {}", bind_addr);
    log::info!("📋 Endpoints:");
    log::info!("     GET  /health");
    log::info!("     POST /api/auth/request-otp");
    log::info!("     POST /api/auth/verify-otp");
    log::info!("     POST /api/auth/register");
    log::info!("     POST /api/auth/login");
    log::info!("     POST /api/auth/refresh");
    log::info!("     POST /api/auth/logout");
    log::info!("     GET  /api/auth/me");
    log::info!("     POST /api/admin/otps/purge");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // The worker exits once every queue handle is gone
    maintenance.abort();
    let _ = maintenance.await;
    if tokio::time::timeout(EMAIL_DRAIN_TIMEOUT, email_worker)
        .await
        .is_err()
    {
        log::warn!("Email queue not drained before shutdown");
    }

    log::info!("👋 Shut down cleanly");
    Ok(())
}

/// `*` allows any origin without credentials; an explicit list allows the
/// refresh cookie to travel cross-origin
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    if server.cors_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Periodically remove spent codes and stale rate-limit windows
async fn run_maintenance(state: AppState) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.tick().await;

    loop {
        interval.tick().await;

        if let Err(e) = state.auth_service.purge_expired_otps().await {
            log::error!("OTP purge failed: {}", e);
        }

        match state.rate_limiter.cleanup_expired_records().await {
            Ok(removed) => log::debug!("Removed {} stale rate-limit windows", removed),
            Err(e) => log::error!("Rate-limit cleanup failed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("🛑 Shutdown signal received");
}
