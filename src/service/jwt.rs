//! JWT Token Service
//!
//! Signs and verifies the three token kinds the service hands out. Access
//! and registration tokens share the access secret and are told apart by
//! their `type` claim; refresh tokens use their own secret. Verification is
//! pure computation.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{
    AccessTokenClaims, RefreshTokenClaims, RegistrationTokenClaims, Role, TokenPair, UserContext,
    ACCESS_TOKEN_TYPE, REFRESH_TOKEN_TYPE, REGISTRATION_TOKEN_TYPE,
};
use crate::utils::error::AppError;

/// Message for every token failure that reaches a client
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid or expired token";

/// Token service errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token generation failed: {0}")]
    TokenGeneration(String),
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::InvalidToken(reason) => {
                log::debug!("Rejected token: {}", reason);
                AppError::Authentication(INVALID_TOKEN_MESSAGE.to_string())
            }
            JwtError::TokenGeneration(e) => AppError::Internal(e),
        }
    }
}

pub type JwtResult<T> = Result<T, JwtError>;

/// JWT service for issuing and validating tokens
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_token_expires_in: Duration,
    refresh_token_expires_in: Duration,
    registration_token_expires_in: Duration,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            access_token_expires_in: Duration::minutes(config.access_token_ttl_minutes),
            refresh_token_expires_in: Duration::days(config.refresh_token_ttl_days),
            registration_token_expires_in: Duration::minutes(
                config.registration_token_ttl_minutes,
            ),
        }
    }

    pub fn issue_access(&self, identity_id: Uuid, email: &str, role: Role) -> JwtResult<String> {
        let now = Utc::now();
        let claims = AccessTokenClaims::new(
            identity_id,
            email,
            role,
            now + self.access_token_expires_in,
            now,
        );
        self.sign(&claims, &self.access_encoding)
    }

    pub fn issue_refresh(&self, identity_id: Uuid) -> JwtResult<String> {
        let now = Utc::now();
        let claims =
            RefreshTokenClaims::new(identity_id, now + self.refresh_token_expires_in, now);
        self.sign(&claims, &self.refresh_encoding)
    }

    pub fn issue_registration(&self, identity_id: Uuid, email: &str) -> JwtResult<String> {
        let now = Utc::now();
        let claims = RegistrationTokenClaims::new(
            identity_id,
            email,
            now + self.registration_token_expires_in,
            now,
        );
        self.sign(&claims, &self.access_encoding)
    }

    /// Generate a new access and refresh token pair for an identity
    pub fn issue_token_pair(
        &self,
        identity_id: Uuid,
        email: &str,
        role: Role,
    ) -> JwtResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue_access(identity_id, email, role)?,
            refresh_token: self.issue_refresh(identity_id)?,
            access_expires_in: self.access_token_expires_in.num_seconds(),
            refresh_expires_in: self.refresh_token_expires_in.num_seconds(),
        })
    }

    /// Validate an access token and extract user context
    pub fn verify_access(&self, token: &str) -> JwtResult<UserContext> {
        let claims: AccessTokenClaims = self.decode_checked(token, &self.access_decoding)?;
        ensure_type(&claims.token_type, ACCESS_TOKEN_TYPE)?;

        UserContext::from_access_claims(&claims)
            .map_err(|_| JwtError::InvalidToken("Invalid subject in token".into()))
    }

    pub fn verify_refresh(&self, token: &str) -> JwtResult<RefreshTokenClaims> {
        let claims: RefreshTokenClaims = self.decode_checked(token, &self.refresh_decoding)?;
        ensure_type(&claims.token_type, REFRESH_TOKEN_TYPE)?;
        Ok(claims)
    }

    pub fn verify_registration(&self, token: &str) -> JwtResult<RegistrationTokenClaims> {
        let claims: RegistrationTokenClaims =
            self.decode_checked(token, &self.access_decoding)?;
        ensure_type(&claims.token_type, REGISTRATION_TOKEN_TYPE)?;
        Ok(claims)
    }

    fn sign<T: Serialize>(&self, claims: &T, key: &EncodingKey) -> JwtResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, key)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))
    }

    fn decode_checked<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> JwtResult<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;

        decode::<T>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| JwtError::InvalidToken(e.to_string()))
    }
}

fn ensure_type(actual: &str, expected: &str) -> JwtResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(JwtError::InvalidToken(format!(
            "Expected {} token, got {}",
            expected, actual
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> JwtService {
        JwtService::new(&JwtConfig::new(
            "test_access_secret_key",
            "test_refresh_secret_key",
        ))
    }

    #[test]
    fn test_access_token_round_trip() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let token = service
            .issue_access(user_id, "a@example.com", Role::Customer)
            .unwrap();
        let context = service.verify_access(&token).unwrap();

        assert_eq!(context.user_id, user_id);
        assert_eq!(context.email, "a@example.com");
        assert_eq!(context.role, Role::Customer);
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let token = service.issue_refresh(user_id).unwrap();
        let claims = service.verify_refresh(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.token_type, "refresh");
    }

    #[test]
    fn test_tokens_rejected_under_the_other_secret() {
        let service = create_test_service();
        let pair = service
            .issue_token_pair(Uuid::new_v4(), "a@example.com", Role::Customer)
            .unwrap();

        assert!(matches!(
            service.verify_refresh(&pair.access_token),
            Err(JwtError::InvalidToken(_))
        ));
        assert!(matches!(
            service.verify_access(&pair.refresh_token),
            Err(JwtError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_registration_token_not_accepted_as_access() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let registration = service.issue_registration(user_id, "a@example.com").unwrap();
        assert!(service.verify_access(&registration).is_err());

        let claims = service.verify_registration(&registration).unwrap();
        assert_eq!(claims.email, "a@example.com");

        let access = service
            .issue_access(user_id, "a@example.com", Role::Customer)
            .unwrap();
        assert!(matches!(
            service.verify_registration(&access),
            Err(JwtError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut config = JwtConfig::new("test_access_secret_key", "test_refresh_secret_key");
        config.access_token_ttl_minutes = -10;
        let service = JwtService::new(&config);

        let token = service
            .issue_access(Uuid::new_v4(), "a@example.com", Role::Customer)
            .unwrap();
        assert!(service.verify_access(&token).is_err());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let service = create_test_service();
        let other = JwtService::new(&JwtConfig::new("another_access_key", "another_refresh_key"));

        let token = other
            .issue_access(Uuid::new_v4(), "a@example.com", Role::Admin)
            .unwrap();
        assert!(service.verify_access(&token).is_err());
        assert!(service.verify_access("not.a.jwt").is_err());
    }

    #[test]
    fn test_token_pair_lifetimes() {
        let service = create_test_service();
        let pair = service
            .issue_token_pair(Uuid::new_v4(), "a@example.com", Role::Customer)
            .unwrap();

        assert_eq!(pair.access_expires_in, 15 * 60);
        assert_eq!(pair.refresh_expires_in, 7 * 24 * 60 * 60);
        assert_ne!(pair.access_token, pair.refresh_token);
    }

    #[test]
    fn test_invalid_token_maps_to_generic_401() {
        let err: AppError = JwtError::InvalidToken("ExpiredSignature".into()).into();
        match err {
            AppError::Authentication(msg) => assert_eq!(msg, INVALID_TOKEN_MESSAGE),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
