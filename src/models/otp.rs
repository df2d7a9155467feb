//! OTP Models
//!
//! Data structures for one-time code records and verification outcomes.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::security::is_expired_at;

/// What a one-time code is issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtpPurpose {
    #[default]
    Signup,
    Login,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Signup => "signup",
            OtpPurpose::Login => "login",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signup" => Ok(OtpPurpose::Signup),
            "login" => Ok(OtpPurpose::Login),
            other => Err(format!("Unknown OTP purpose: {}", other)),
        }
    }
}

/// Database row for a one-time code
#[derive(Debug, Clone, FromRow)]
pub struct OtpRecord {
    pub id: Uuid,
    /// Normalized (trimmed, lowercased) email
    pub email: String,
    /// bcrypt hash of the numeric code
    pub otp_hash: String,
    /// Stored as text, see [`OtpPurpose::as_str`]
    pub purpose: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set when consumed or superseded
    pub used_at: Option<DateTime<Utc>>,
}

impl OtpRecord {
    /// A code is still good at the instant it expires
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired_at(self.expires_at, now)
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }
}

/// Data for inserting a new one-time code
#[derive(Debug, Clone)]
pub struct NewOtp {
    pub email: String,
    pub otp_hash: String,
    pub purpose: OtpPurpose,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued code; the plaintext only travels to the email dispatcher
#[derive(Clone)]
pub struct IssuedOtp {
    pub record_id: Uuid,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for IssuedOtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedOtp")
            .field("record_id", &self.record_id)
            .field("code", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of checking a candidate code against the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    NoOtpFound,
    Expired,
    AttemptsExceeded,
    CodeInvalid,
}

impl VerificationOutcome {
    /// Rejection reason for every outcome other than `Verified`
    pub fn failure_reason(&self) -> Option<OtpFailureReason> {
        match self {
            VerificationOutcome::Verified => None,
            VerificationOutcome::NoOtpFound => Some(OtpFailureReason::NoOtp),
            VerificationOutcome::Expired => Some(OtpFailureReason::Expired),
            VerificationOutcome::AttemptsExceeded => Some(OtpFailureReason::TooManyAttempts),
            VerificationOutcome::CodeInvalid => Some(OtpFailureReason::Invalid),
        }
    }
}

/// Client-facing reason a code was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpFailureReason {
    NoOtp,
    Expired,
    TooManyAttempts,
    Invalid,
}

impl OtpFailureReason {
    /// Single mapping from rejection reason to HTTP status
    pub fn status_code(&self) -> StatusCode {
        match self {
            OtpFailureReason::NoOtp => StatusCode::BAD_REQUEST,
            OtpFailureReason::Expired => StatusCode::BAD_REQUEST,
            OtpFailureReason::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            OtpFailureReason::Invalid => StatusCode::BAD_REQUEST,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            OtpFailureReason::NoOtp => "No active code for this email; request a new one",
            OtpFailureReason::Expired => "Code has expired; request a new one",
            OtpFailureReason::TooManyAttempts => "Too many attempts; request a new code",
            OtpFailureReason::Invalid => "Invalid code",
        }
    }
}
