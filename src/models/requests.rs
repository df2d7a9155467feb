//! Request and Response Models
//!
//! Data structures for API request and response payloads with validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{Identity, OtpFailureReason, OtpPurpose};
use crate::utils::validation::{email_validator, name_validator, otp_validator};

/// Request payload for issuing a one-time code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RequestOtpRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    /// Defaults to `signup` when omitted
    #[serde(default)]
    pub purpose: Option<OtpPurpose>,
}

/// Request payload for submitting a one-time code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    #[validate(custom(function = "otp_validator"))]
    pub otp: String,

    #[serde(default)]
    pub purpose: Option<OtpPurpose>,
}

/// Request payload for setting a password after a verified signup code
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    pub password: String,

    #[validate(custom(function = "name_validator"))]
    pub full_name: Option<String>,

    /// Token returned by `/verify-otp` for purpose `signup`
    #[validate(length(min = 1, message = "Registration token cannot be empty"))]
    pub registration_token: String,
}

/// Request payload for password login
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(custom(function = "email_validator"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password cannot be empty"))]
    pub password: String,
}

/// Response for `/request-otp`
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestOtpResponse {
    pub ok: bool,
    pub message: String,
    /// Seconds until the code expires
    pub expires_in: i64,
}

/// Response for a successful `/verify-otp`
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyOtpResponse {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
}

/// Body for a rejected code
#[derive(Debug, Serialize, Deserialize)]
pub struct OtpRejectionResponse {
    pub ok: bool,
    pub reason: OtpFailureReason,
    pub error: String,
}

impl OtpRejectionResponse {
    pub fn new(reason: OtpFailureReason) -> Self {
        Self {
            ok: false,
            reason,
            error: reason.message().to_string(),
        }
    }
}

/// Response carrying a fresh access token; the refresh token travels in a cookie
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub ok: bool,
    pub token: String,
    pub customer_id: Uuid,
}

/// Response for `/me`
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub ok: bool,
    pub user: Identity,
}

/// Response for `/logout`
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Response for the admin purge hook
#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub ok: bool,
    pub purged: u64,
}

/// Response for health check
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}
