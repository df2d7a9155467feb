//! Rate Limiting Service
//!
//! Fixed-window request limits for the OTP endpoints, keyed by client
//! identifier and endpoint. Counters live in a [`RateLimitStore`] so every
//! increment is atomic in the backend.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::database::{RateLimitStore, StoreError};
use crate::utils::error::AppError;

/// Rate limiting specific errors
#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Store error in rate limiting: {0}")]
    Store(#[from] StoreError),

    #[error("Rate limit exceeded for {identifier} on {endpoint}: {attempts} attempts in window")]
    RateLimitExceeded {
        identifier: String,
        endpoint: String,
        attempts: u32,
        retry_after: u64,
    },
}

impl From<RateLimitError> for AppError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::Store(e) => AppError::Store(e),
            RateLimitError::RateLimitExceeded { .. } => {
                AppError::RateLimit("Too many requests. Please try again later.".to_string())
            }
        }
    }
}

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Rate limit configuration for a specific endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    pub max_attempts: u32,
    pub window_minutes: u32,
}

impl RateLimit {
    pub fn new(max_attempts: u32, window_minutes: u32) -> Self {
        Self {
            max_attempts,
            window_minutes,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::minutes(self.window_minutes as i64)
    }
}

/// Endpoints subject to rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitedEndpoint {
    RequestOtp,
    VerifyOtp,
}

impl RateLimitedEndpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitedEndpoint::RequestOtp => "request_otp",
            RateLimitedEndpoint::VerifyOtp => "verify_otp",
        }
    }
}

impl fmt::Display for RateLimitedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-endpoint limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitConfig {
    pub request_otp: RateLimit,
    pub verify_otp: RateLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            request_otp: RateLimit::new(5, 15),
            verify_otp: RateLimit::new(10, 15),
        }
    }
}

impl RateLimitConfig {
    /// Get rate limit configuration for a specific endpoint
    pub fn get_limit(&self, endpoint: RateLimitedEndpoint) -> RateLimit {
        match endpoint {
            RateLimitedEndpoint::RequestOtp => self.request_otp,
            RateLimitedEndpoint::VerifyOtp => self.verify_otp,
        }
    }
}

/// Rate limiting status for an identifier after one recorded hit
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub identifier: String,
    pub endpoint: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl RateLimitStatus {
    pub fn is_limit_exceeded(&self) -> bool {
        self.attempts > self.max_attempts
    }

    /// Seconds until the window closes, never less than one
    pub fn retry_after_seconds(&self, now: DateTime<Utc>) -> u64 {
        (self.window_end - now).num_seconds().max(1) as u64
    }
}

/// Rate limiting service implementation
pub struct RateLimitService {
    store: Arc<dyn RateLimitStore>,
    config: RateLimitConfig,
    enabled: bool,
}

impl RateLimitService {
    /// Creates a new rate limiting service over the given counter store
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimitConfig, enabled: bool) -> Self {
        Self {
            store,
            config,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request and reject it if the window is exhausted
    pub async fn check_and_record(
        &self,
        identifier: &str,
        endpoint: RateLimitedEndpoint,
    ) -> RateLimitResult<RateLimitStatus> {
        self.check_and_record_at(identifier, endpoint, Utc::now())
            .await
    }

    pub async fn check_and_record_at(
        &self,
        identifier: &str,
        endpoint: RateLimitedEndpoint,
        now: DateTime<Utc>,
    ) -> RateLimitResult<RateLimitStatus> {
        let limit = self.config.get_limit(endpoint);

        if !self.enabled {
            return Ok(RateLimitStatus {
                identifier: identifier.to_string(),
                endpoint: endpoint.to_string(),
                attempts: 0,
                max_attempts: limit.max_attempts,
                window_start: now,
                window_end: now + limit.window(),
            });
        }

        let hit = self
            .store
            .hit(identifier, endpoint.as_str(), limit.window(), now)
            .await?;

        let status = RateLimitStatus {
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            attempts: hit.attempt_count,
            max_attempts: limit.max_attempts,
            window_start: hit.window_start,
            window_end: hit.window_start + limit.window(),
        };

        if status.is_limit_exceeded() {
            log::warn!(
                "Rate limit exceeded for {} on {} ({} attempts)",
                identifier,
                endpoint,
                status.attempts
            );
            return Err(RateLimitError::RateLimitExceeded {
                identifier: identifier.to_string(),
                endpoint: endpoint.to_string(),
                attempts: status.attempts,
                retry_after: status.retry_after_seconds(now),
            });
        }

        Ok(status)
    }

    /// Remove counters whose windows closed long ago
    pub async fn cleanup_expired_records(&self) -> RateLimitResult<u64> {
        let longest = self
            .config
            .request_otp
            .window()
            .max(self.config.verify_otp.window());
        Ok(self.store.purge_stale(Utc::now() - longest).await?)
    }
}
