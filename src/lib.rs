//! Customer Auth Service Library
//!
//! Email one-time code verification and session issuance for customer
//! accounts. A customer proves control of an email address with a short
//! numeric code, may then set a password, and receives a short-lived access
//! token plus a long-lived refresh token delivered as an `HttpOnly` cookie.
//!
//! # Features
//!
//! - **One-time codes**: bcrypt-hashed, single use, time limited, with a
//!   per-code attempt counter
//! - **Two flows**: `signup` codes yield a registration token exchanged at
//!   `/register`; `login` codes yield a session directly
//! - **Sessions**: HS256 access and refresh tokens signed with separate secrets
//! - **Background email**: a queue worker with retries and a dead-letter log
//! - **Rate limiting**: fixed windows per client and endpoint
//! - **Pluggable storage**: Postgres through sqlx, or in memory
//! - **Flexible Router**: endpoint groups enabled through `RouterBuilder`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use customer_auth_service::{
//!     api::{AppState, RouterBuilder},
//!     config::AppConfig,
//!     database::MemoryStore,
//!     service::LogMailer,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::in_memory("access-secret", "refresh-secret");
//!     let (state, _worker) =
//!         AppState::build(&config, Arc::new(MemoryStore::new()), Arc::new(LogMailer))?;
//!
//!     // Passwordless deployment: codes and sessions only
//!     let app = RouterBuilder::with_otp_only_routes().build(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **API Layer**: handlers, session and rate-limit middleware, routing
//! - **Service Layer**: auth flows, OTP ledger, tokens, email, rate limits
//! - **Models**: records, token claims, request/response payloads
//! - **Database**: store traits with Postgres and in-memory backends
//! - **Utils**: hashing, validation, error mapping

/// HTTP API layer with handlers and configurable routing
pub mod api;

/// Configuration loaded from the environment
pub mod config;

/// Store traits and their backends
pub mod database;

/// Data models and request/response structures
pub mod models;

/// Auth flows and supporting services
pub mod service;

/// Shared utilities for security, validation, and error handling
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types for convenient access
pub use api::{create_routes, AppState, RouterBuilder};
pub use models::{
    auth::{TokenPair, UserContext},
    identity::{Identity, Role},
    otp::{OtpFailureReason, OtpPurpose},
};
pub use service::{AuthService, EmailDispatcher, JwtService, OtpLedger, RateLimitService};
pub use utils::error::{AppError, AppResult, ErrorResponse};

pub use database::{DatabaseConfig, DatabasePool, MemoryStore, PgStore};

pub use config::{env, AppConfig, EmailConfig, JwtConfig, OtpConfig, SecurityConfig, ServerConfig};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
