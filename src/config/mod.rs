//! Configuration Module
//!
//! Centralized configuration for the auth service. [`AppConfig`] is read
//! from the environment once at startup, validated, and then passed by
//! value into the constructors that need it.

pub mod security;

use std::str::FromStr;
use thiserror::Error;

use crate::database::DatabaseConfig;

// Re-export configuration types for convenient access
pub use security::{CookieConfig, RateLimitingConfig, SecurityConfig, SecurityConfigError};

/// Environment variable helpers
pub mod env {
    use std::env;
    use thiserror::Error;

    #[derive(Error, Debug, PartialEq, Eq)]
    pub enum EnvError {
        #[error("Required environment variable {0} is not set")]
        Missing(String),
    }

    /// Get environment variable as string with default
    pub fn get_string(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get a non-empty environment variable, if set
    pub fn get_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// Get environment variable as boolean with default
    pub fn get_bool(key: &str, default: bool) -> bool {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u32 with default
    pub fn get_u32(key: &str, default: u32) -> u32 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u16 with default
    pub fn get_u16(key: &str, default: u16) -> u16 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as u64 with default
    pub fn get_u64(key: &str, default: u64) -> u64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as usize with default
    pub fn get_usize(key: &str, default: usize) -> usize {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as i32 with default
    pub fn get_i32(key: &str, default: i32) -> i32 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get environment variable as i64 with default
    pub fn get_i64(key: &str, default: i64) -> i64 {
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Get required environment variable
    pub fn get_required(key: &str) -> Result<String, EnvError> {
        get_optional(key).ok_or_else(|| EnvError::Missing(key.to_string()))
    }
}

/// Longest accepted token and code lifetimes
pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 24 * 60;
pub const MAX_REGISTRATION_TOKEN_TTL_MINUTES: i64 = 24 * 60;
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 365;
pub const MAX_OTP_TTL_MINUTES: i64 = 24 * 60;

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Env(#[from] env::EnvError),

    #[error(transparent)]
    Security(#[from] SecurityConfigError),

    #[error("Invalid configuration value for {key}: {value} - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Which store backend serves the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local; data is lost on restart
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(ConfigError::InvalidValue {
                key: "STORAGE_BACKEND".to_string(),
                value: other.to_string(),
                reason: "Must be 'postgres' or 'memory'".to_string(),
            }),
        }
    }
}

/// Application configuration combining all service configurations
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageBackend,
    /// Present whenever `storage` is `Postgres`
    pub database: Option<DatabaseConfig>,
    pub jwt: JwtConfig,
    pub otp: OtpConfig,
    pub email: EmailConfig,
    pub security: SecurityConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub registration_token_ttl_minutes: i64,
}

/// One-time code configuration
#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub length: usize,
    pub ttl_minutes: i64,
    pub max_attempts: i32,
}

/// SMTP transport settings
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

/// Email dispatch configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// `None` logs outgoing mail instead of sending it
    pub smtp: Option<SmtpConfig>,
    /// Product name shown in the email footer
    pub app_name: String,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_origins: vec!["*".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::get_string("SERVER_HOST", "0.0.0.0"),
            port: env::get_u16("SERVER_PORT", 3000),
            cors_origins: env::get_string("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

impl JwtConfig {
    /// Default lifetimes: access 15 minutes, refresh 7 days, registration 15 minutes
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
            registration_token_ttl_minutes: 15,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            access_secret: env::get_required("JWT_ACCESS_SECRET")?,
            refresh_secret: env::get_required("JWT_REFRESH_SECRET")?,
            access_token_ttl_minutes: env::get_i64("ACCESS_TOKEN_TTL_MINUTES", 15),
            refresh_token_ttl_days: env::get_i64("REFRESH_TOKEN_TTL_DAYS", 7),
            registration_token_ttl_minutes: env::get_i64("REGISTRATION_TOKEN_TTL_MINUTES", 15),
        })
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            length: 6,
            ttl_minutes: 10,
            max_attempts: 5,
        }
    }
}

impl OtpConfig {
    pub fn from_env() -> Self {
        Self {
            length: env::get_usize("OTP_LENGTH", 6),
            ttl_minutes: env::get_i64("OTP_TTL_MINUTES", 10),
            max_attempts: env::get_i32("OTP_MAX_ATTEMPTS", 5),
        }
    }
}

impl SmtpConfig {
    /// `None` unless `SMTP_HOST` is set
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(host) = env::get_optional("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            host,
            port: env::get_u16("SMTP_PORT", 587),
            username: env::get_required("SMTP_USERNAME")?,
            password: env::get_required("SMTP_PASSWORD")?,
            from_email: env::get_required("SMTP_FROM_EMAIL")?,
            from_name: env::get_string("SMTP_FROM_NAME", "Customer Accounts"),
        }))
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp: None,
            app_name: "Customer Accounts".to_string(),
            queue_capacity: 100,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            smtp: SmtpConfig::from_env()?,
            app_name: env::get_string("APP_NAME", "Customer Accounts"),
            queue_capacity: env::get_usize("EMAIL_QUEUE_CAPACITY", 100),
            max_retries: env::get_u32("EMAIL_MAX_RETRIES", 3),
            retry_backoff_ms: env::get_u64("EMAIL_RETRY_BACKOFF_MS", 500),
        })
    }
}

impl AppConfig {
    /// In-memory configuration with default settings and the given secrets
    pub fn in_memory(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageBackend::Memory,
            database: None,
            jwt: JwtConfig::new(access_secret, refresh_secret),
            otp: OtpConfig::default(),
            email: EmailConfig::default(),
            security: SecurityConfig::default(),
        }
    }

    /// Load complete application configuration from environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage: StorageBackend = env::get_string("STORAGE_BACKEND", "postgres").parse()?;
        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig::from_env()?),
            StorageBackend::Memory => None,
        };

        Ok(Self {
            server: ServerConfig::from_env(),
            storage,
            database,
            jwt: JwtConfig::from_env()?,
            otp: OtpConfig::from_env(),
            email: EmailConfig::from_env()?,
            security: SecurityConfig::from_env()?,
        })
    }

    /// Validate the complete configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.security.validate()?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port must be greater than 0".into(),
            ));
        }

        match (&self.storage, &self.database) {
            (StorageBackend::Postgres, None) => {
                return Err(ConfigError::Validation(
                    "DATABASE_URL is required for the postgres backend".into(),
                ));
            }
            (_, Some(db)) => {
                if db.max_connections == 0 {
                    return Err(ConfigError::Validation(
                        "Database max_connections must be greater than 0".into(),
                    ));
                }
                if db.min_connections > db.max_connections {
                    return Err(ConfigError::Validation(
                        "Database min_connections cannot be greater than max_connections".into(),
                    ));
                }
            }
            _ => {}
        }

        if self.jwt.access_secret.is_empty() || self.jwt.refresh_secret.is_empty() {
            return Err(ConfigError::Validation(
                "JWT secrets cannot be empty".into(),
            ));
        }

        if self.jwt.access_secret == self.jwt.refresh_secret {
            return Err(ConfigError::Validation(
                "JWT access and refresh secrets must be different".into(),
            ));
        }

        for (key, value, max) in [
            (
                "ACCESS_TOKEN_TTL_MINUTES",
                self.jwt.access_token_ttl_minutes,
                MAX_ACCESS_TOKEN_TTL_MINUTES,
            ),
            (
                "REFRESH_TOKEN_TTL_DAYS",
                self.jwt.refresh_token_ttl_days,
                MAX_REFRESH_TOKEN_TTL_DAYS,
            ),
            (
                "REGISTRATION_TOKEN_TTL_MINUTES",
                self.jwt.registration_token_ttl_minutes,
                MAX_REGISTRATION_TOKEN_TTL_MINUTES,
            ),
            ("OTP_TTL_MINUTES", self.otp.ttl_minutes, MAX_OTP_TTL_MINUTES),
        ] {
            if !(1..=max).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    value: value.to_string(),
                    reason: format!("Must be between 1 and {}", max),
                });
            }
        }

        if !(4..=10).contains(&self.otp.length) {
            return Err(ConfigError::InvalidValue {
                key: "OTP_LENGTH".into(),
                value: self.otp.length.to_string(),
                reason: "Must be between 4 and 10 digits".into(),
            });
        }

        if self.otp.max_attempts <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "OTP_MAX_ATTEMPTS".into(),
                value: self.otp.max_attempts.to_string(),
                reason: "Must be positive".into(),
            });
        }

        if self.email.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMAIL_QUEUE_CAPACITY".into(),
                value: "0".into(),
                reason: "Must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
