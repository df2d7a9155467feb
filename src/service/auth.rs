//! Authentication Service
//!
//! Drives the one-time code flows and the password/session flows on top of
//! the OTP ledger, the identity store, and the token service.
//!
//! A verified `signup` code yields a short-lived registration token that
//! `/register` exchanges for a password and a session. A verified `login`
//! code yields a session directly.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::OtpConfig;
use crate::database::{IdentityStore, OtpStore};
use crate::models::{
    Identity, IdentityUpsert, IdentityWithPassword, OtpFailureReason, OtpPurpose, TokenPair,
    VerificationOutcome,
};
use crate::service::email_service::{EmailDispatcher, OtpEmailRenderer};
use crate::service::jwt::{JwtError, JwtService, INVALID_TOKEN_MESSAGE};
use crate::service::otp_ledger::OtpLedger;
use crate::utils::error::{AppError, AppResult};
use crate::utils::security::CredentialHasher;
use crate::utils::validation::normalize_email;

/// Credential and account failures of the auth flows
#[derive(Error, Debug)]
pub enum AuthServiceError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("No password set; please use OTP flow")]
    PasswordNotSet,

    #[error("User already exists")]
    AlreadyRegistered,

    #[error("Registration token was issued for a different email")]
    RegistrationMismatch,

    #[error("User not found")]
    IdentityNotFound,
}

impl From<AuthServiceError> for AppError {
    fn from(err: AuthServiceError) -> Self {
        match err {
            AuthServiceError::InvalidCredentials | AuthServiceError::PasswordNotSet => {
                AppError::Authentication(err.to_string())
            }
            AuthServiceError::AlreadyRegistered => AppError::Conflict(err.to_string()),
            AuthServiceError::RegistrationMismatch => {
                log::debug!("{}", err);
                AppError::Authentication(INVALID_TOKEN_MESSAGE.to_string())
            }
            AuthServiceError::IdentityNotFound => AppError::NotFound(err.to_string()),
        }
    }
}

/// Result of a successful `request_otp`
#[derive(Debug, Clone, Copy)]
pub struct OtpRequested {
    /// Seconds until the code expires
    pub expires_in: i64,
}

/// What a verified code was exchanged for
#[derive(Debug)]
pub enum VerifyOtpSuccess {
    /// `signup`: a token for `/register`
    Registration {
        identity: Identity,
        registration_token: String,
    },
    /// `login`: a full session
    Session { identity: Identity, tokens: TokenPair },
}

/// Input for [`AuthService::register`]
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub registration_token: String,
}

/// An identity together with a freshly issued token pair
#[derive(Debug)]
pub struct Session {
    pub identity: Identity,
    pub tokens: TokenPair,
}

pub struct AuthService {
    ledger: OtpLedger,
    identities: Arc<dyn IdentityStore>,
    jwt: Arc<JwtService>,
    hasher: CredentialHasher,
    dispatcher: EmailDispatcher,
    renderer: OtpEmailRenderer,
}

impl AuthService {
    pub fn new(
        otps: Arc<dyn OtpStore>,
        identities: Arc<dyn IdentityStore>,
        jwt: Arc<JwtService>,
        hasher: CredentialHasher,
        otp_config: OtpConfig,
        dispatcher: EmailDispatcher,
        renderer: OtpEmailRenderer,
    ) -> Self {
        Self {
            ledger: OtpLedger::new(otps, hasher, otp_config),
            identities,
            jwt,
            hasher,
            dispatcher,
            renderer,
        }
    }

    pub fn jwt(&self) -> &Arc<JwtService> {
        &self.jwt
    }

    /// Issue a code and queue its email; delivery happens in the background
    pub async fn request_otp(&self, email: &str, purpose: OtpPurpose) -> AppResult<OtpRequested> {
        let email = normalize_email(email);
        let issued = self.ledger.issue(&email, purpose).await?;

        let job = self
            .renderer
            .render(&email, &issued.code, purpose, self.ledger.ttl_minutes())?;
        self.dispatcher.enqueue(job);

        Ok(OtpRequested {
            expires_in: self.ledger.ttl_seconds(),
        })
    }

    /// Check a submitted code and, on success, exchange it per purpose
    ///
    /// Rejections come back as `Ok(Err(reason))`; the outer error is for
    /// store and signing failures only.
    pub async fn verify_otp(
        &self,
        email: &str,
        purpose: OtpPurpose,
        code: &str,
    ) -> AppResult<Result<VerifyOtpSuccess, OtpFailureReason>> {
        let email = normalize_email(email);
        let outcome = self.ledger.verify(&email, purpose, code).await?;

        if let Some(reason) = outcome.failure_reason() {
            log::debug!("Rejected {} code for {}: {:?}", purpose, email, reason);
            return Ok(Err(reason));
        }
        debug_assert_eq!(outcome, VerificationOutcome::Verified);

        let row = self
            .identities
            .upsert_by_email(IdentityUpsert {
                email: email.clone(),
                full_name: None,
                is_verified: true,
            })
            .await?;

        let success = match purpose {
            OtpPurpose::Signup => {
                let registration_token = self.jwt.issue_registration(row.id, &row.email)?;
                VerifyOtpSuccess::Registration {
                    identity: row.into(),
                    registration_token,
                }
            }
            OtpPurpose::Login => {
                let tokens = self.jwt.issue_token_pair(row.id, &row.email, row.role())?;
                VerifyOtpSuccess::Session {
                    identity: row.into(),
                    tokens,
                }
            }
        };

        log::info!("Verified {} code for {}", purpose, email);
        Ok(Ok(success))
    }

    /// Set a password for an identity that proved its email with a signup code
    pub async fn register(&self, registration: Registration) -> AppResult<Session> {
        let claims = self
            .jwt
            .verify_registration(&registration.registration_token)?;

        let email = normalize_email(&registration.email);
        if claims.email != email {
            return Err(AuthServiceError::RegistrationMismatch.into());
        }

        if let Some(existing) = self.identities.find_by_email(&email).await? {
            if existing.has_password() {
                return Err(AuthServiceError::AlreadyRegistered.into());
            }
        }

        let password_hash = self.hasher.hash_async(registration.password).await?;

        let row = self
            .identities
            .upsert_by_email(IdentityUpsert {
                email,
                full_name: registration.full_name,
                is_verified: true,
            })
            .await?;

        // Two registrations racing past the check above meet here
        if !self
            .identities
            .set_password_if_absent(row.id, &password_hash)
            .await?
        {
            return Err(AuthServiceError::AlreadyRegistered.into());
        }

        log::info!("Registered identity {}", row.id);
        self.open_session(row)
    }

    pub async fn login(&self, email: &str, password: &str) -> AppResult<Session> {
        let email = normalize_email(email);

        let row = self
            .identities
            .find_by_email(&email)
            .await?
            .ok_or(AuthServiceError::InvalidCredentials)?;

        let Some(password_hash) = row.password_hash.clone() else {
            return Err(AuthServiceError::PasswordNotSet.into());
        };

        if !self
            .hasher
            .verify_async(password.to_string(), password_hash)
            .await?
        {
            log::debug!("Password mismatch for identity {}", row.id);
            return Err(AuthServiceError::InvalidCredentials.into());
        }

        self.open_session(row)
    }

    /// Exchange a refresh token for a new pair; the role is read fresh
    pub async fn refresh(&self, refresh_token: &str) -> AppResult<Session> {
        let claims = self.jwt.verify_refresh(refresh_token)?;
        let identity_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| JwtError::InvalidToken("Invalid subject in token".into()))?;

        let row = self
            .identities
            .find_by_id(identity_id)
            .await?
            .ok_or(AuthServiceError::IdentityNotFound)?;

        self.open_session(row)
    }

    pub async fn current_identity(&self, identity_id: Uuid) -> AppResult<Identity> {
        self.identities
            .find_by_id(identity_id)
            .await?
            .map(Identity::from)
            .ok_or_else(|| AuthServiceError::IdentityNotFound.into())
    }

    pub async fn purge_expired_otps(&self) -> AppResult<u64> {
        self.ledger.purge_expired().await
    }

    /// Round trip to the backing store
    pub async fn health_check(&self) -> AppResult<()> {
        self.ledger.health_check().await
    }

    fn open_session(&self, row: IdentityWithPassword) -> AppResult<Session> {
        let tokens = self.jwt.issue_token_pair(row.id, &row.email, row.role())?;
        Ok(Session {
            identity: row.into(),
            tokens,
        })
    }
}
