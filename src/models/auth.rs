//! Authentication Models
//!
//! JWT claim sets and the user context attached to authenticated requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Role;

pub const ACCESS_TOKEN_TYPE: &str = "access";
pub const REFRESH_TOKEN_TYPE: &str = "refresh";
pub const REGISTRATION_TOKEN_TYPE: &str = "registration";

/// Access and refresh token issued together
///
/// The access token goes in the response body; the refresh token is only
/// ever delivered as an `HttpOnly` cookie.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub access_expires_in: i64,
    /// Refresh token lifetime in seconds, used as the cookie `Max-Age`
    pub refresh_expires_in: i64,
}

/// JWT claims structure for access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject - identity ID
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Always "access"
    #[serde(rename = "type")]
    pub token_type: String,
}

impl AccessTokenClaims {
    pub fn new(
        identity_id: Uuid,
        email: &str,
        role: Role,
        expires_at: DateTime<Utc>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: identity_id.to_string(),
            email: email.to_string(),
            role,
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        }
    }
}

/// JWT claims structure for refresh tokens
///
/// Carries only the subject so refresh re-reads email and role from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Always "refresh"
    #[serde(rename = "type")]
    pub token_type: String,
}

impl RefreshTokenClaims {
    pub fn new(identity_id: Uuid, expires_at: DateTime<Utc>, issued_at: DateTime<Utc>) -> Self {
        Self {
            sub: identity_id.to_string(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: REFRESH_TOKEN_TYPE.to_string(),
        }
    }
}

/// JWT claims for the short-lived credential handed out after a verified
/// signup code and exchanged at `/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationTokenClaims {
    pub sub: String,
    pub email: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Always "registration"
    #[serde(rename = "type")]
    pub token_type: String,
}

impl RegistrationTokenClaims {
    pub fn new(
        identity_id: Uuid,
        email: &str,
        expires_at: DateTime<Utc>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sub: identity_id.to_string(),
            email: email.to_string(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type: REGISTRATION_TOKEN_TYPE.to_string(),
        }
    }
}

/// User context extracted from a validated access token
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    /// Token ID (`jti`)
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

impl UserContext {
    /// Create user context from access token claims
    pub fn from_access_claims(claims: &AccessTokenClaims) -> Result<Self, uuid::Error> {
        Ok(Self {
            user_id: Uuid::parse_str(&claims.sub)?,
            email: claims.email.clone(),
            role: claims.role,
            token_id: claims.jti.clone(),
            expires_at: DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_claims_creation() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::minutes(15);

        let claims = AccessTokenClaims::new(user_id, "a@example.com", Role::Customer, expires_at, now);

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.exp, expires_at.timestamp());
        assert_eq!(claims.token_type, "access");
        assert!(!claims.jti.is_empty());

        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["type"], "access");
        assert_eq!(json["role"], "customer");
    }

    #[test]
    fn test_refresh_claims_have_no_email() {
        let claims = RefreshTokenClaims::new(Uuid::new_v4(), Utc::now(), Utc::now());
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["type"], "refresh");
        assert!(json.get("email").is_none());
    }

    #[test]
    fn test_user_context_from_access_claims() {
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + chrono::Duration::hours(1);

        let claims = AccessTokenClaims::new(user_id, "root@example.com", Role::Admin, expires_at, now);
        let context = UserContext::from_access_claims(&claims).unwrap();

        assert_eq!(context.user_id, user_id);
        assert_eq!(context.token_id, claims.jti);
        assert_eq!(context.expires_at.timestamp(), expires_at.timestamp());
        assert!(context.is_admin());
    }

    #[test]
    fn test_user_context_rejects_bad_subject() {
        let mut claims = AccessTokenClaims::new(
            Uuid::new_v4(),
            "a@example.com",
            Role::Customer,
            Utc::now(),
            Utc::now(),
        );
        claims.sub = "not-a-uuid".to_string();
        assert!(UserContext::from_access_claims(&claims).is_err());
    }
}
