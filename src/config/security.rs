//! Security Configuration
//!
//! Hashing cost, refresh cookie attributes, and rate limiting settings.

use std::net::IpAddr;
use thiserror::Error;

use crate::config::env;
use crate::service::rate_limit_service::{RateLimit, RateLimitConfig};
use crate::utils::security::{DEFAULT_BCRYPT_COST, MAX_BCRYPT_COST, MIN_PRODUCTION_BCRYPT_COST};

/// Security configuration errors
#[derive(Error, Debug)]
pub enum SecurityConfigError {
    #[error("Invalid configuration value for {key}: {value} - {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Complete security configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// bcrypt cost for OTP codes and passwords
    pub bcrypt_cost: u32,

    /// Refresh cookie attributes
    pub cookies: CookieConfig,

    pub rate_limiting: RateLimitingConfig,

    /// Peers whose `X-Forwarded-For` header is believed; empty means the
    /// header is ignored and clients are keyed by peer address
    pub trusted_proxies: Vec<IpAddr>,
}

/// Attributes of the refresh token cookie
#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub secure: bool,
    pub domain: Option<String>,
    /// Path the cookie is scoped to; the auth routes live under it
    pub path: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitingConfig {
    pub enabled: bool,
    pub limits: RateLimitConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            cookies: CookieConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: false,
            domain: None,
            path: "/api/auth".to_string(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: RateLimitConfig::default(),
        }
    }
}

impl SecurityConfig {
    /// Load security configuration from environment variables
    pub fn from_env() -> Result<Self, SecurityConfigError> {
        let defaults = RateLimitConfig::default();

        let config = Self {
            bcrypt_cost: env::get_u32("BCRYPT_COST", DEFAULT_BCRYPT_COST),
            cookies: CookieConfig {
                secure: env::get_bool("COOKIE_SECURE", false),
                domain: env::get_optional("COOKIE_DOMAIN"),
                path: env::get_string("COOKIE_PATH", "/api/auth"),
            },
            rate_limiting: RateLimitingConfig {
                enabled: env::get_bool("RATE_LIMITING_ENABLED", true),
                limits: RateLimitConfig {
                    request_otp: RateLimit::new(
                        env::get_u32(
                            "RATE_LIMIT_REQUEST_OTP_MAX",
                            defaults.request_otp.max_attempts,
                        ),
                        env::get_u32(
                            "RATE_LIMIT_REQUEST_OTP_WINDOW",
                            defaults.request_otp.window_minutes,
                        ),
                    ),
                    verify_otp: RateLimit::new(
                        env::get_u32("RATE_LIMIT_VERIFY_OTP_MAX", defaults.verify_otp.max_attempts),
                        env::get_u32(
                            "RATE_LIMIT_VERIFY_OTP_WINDOW",
                            defaults.verify_otp.window_minutes,
                        ),
                    ),
                },
            },
            trusted_proxies: parse_trusted_proxies(&env::get_string("TRUSTED_PROXIES", ""))?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the security configuration
    pub fn validate(&self) -> Result<(), SecurityConfigError> {
        if !(MIN_PRODUCTION_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(SecurityConfigError::InvalidValue {
                key: "BCRYPT_COST".to_string(),
                value: self.bcrypt_cost.to_string(),
                reason: format!(
                    "Must be between {} and {}",
                    MIN_PRODUCTION_BCRYPT_COST, MAX_BCRYPT_COST
                ),
            });
        }

        if !self.cookies.path.starts_with('/') {
            return Err(SecurityConfigError::InvalidValue {
                key: "COOKIE_PATH".to_string(),
                value: self.cookies.path.clone(),
                reason: "Must start with '/'".to_string(),
            });
        }

        if self.rate_limiting.enabled {
            for (name, limit) in [
                ("request_otp", &self.rate_limiting.limits.request_otp),
                ("verify_otp", &self.rate_limiting.limits.verify_otp),
            ] {
                if limit.max_attempts == 0 || limit.window_minutes == 0 {
                    return Err(SecurityConfigError::ValidationError(format!(
                        "Rate limit for {} must have a positive max and window",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Comma-separated IP addresses; blank entries are skipped
pub fn parse_trusted_proxies(raw: &str) -> Result<Vec<IpAddr>, SecurityConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map_err(|_| SecurityConfigError::InvalidValue {
                    key: "TRUSTED_PROXIES".to_string(),
                    value: entry.to_string(),
                    reason: "Must be a comma-separated list of IP addresses".to_string(),
                })
        })
        .collect()
}
