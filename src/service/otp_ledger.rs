//! OTP Ledger
//!
//! Lifecycle of one-time codes: issue, verify, consume, purge. Codes are
//! stored only as bcrypt hashes; the plaintext leaves this module once, in
//! the [`IssuedOtp`] handed to the email dispatcher.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::OtpConfig;
use crate::database::OtpStore;
use crate::models::{IssuedOtp, NewOtp, OtpPurpose, VerificationOutcome};
use crate::utils::error::AppResult;
use crate::utils::security::{generate_numeric_otp, CredentialHasher};

pub struct OtpLedger {
    store: Arc<dyn OtpStore>,
    hasher: CredentialHasher,
    config: OtpConfig,
}

impl OtpLedger {
    pub fn new(store: Arc<dyn OtpStore>, hasher: CredentialHasher, config: OtpConfig) -> Self {
        Self {
            store,
            hasher,
            config,
        }
    }

    /// Code lifetime in seconds
    pub fn ttl_seconds(&self) -> i64 {
        self.config.ttl_minutes * 60
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.config.ttl_minutes
    }

    /// Generate a code, hash it, and make it the only active code for the pair
    pub async fn issue(&self, email: &str, purpose: OtpPurpose) -> AppResult<IssuedOtp> {
        let code = generate_numeric_otp(self.config.length);
        let otp_hash = self.hasher.hash_async(code.clone()).await?;
        let expires_at = Utc::now() + Duration::minutes(self.config.ttl_minutes);

        let record = self
            .store
            .replace_active(NewOtp {
                email: email.to_string(),
                otp_hash,
                purpose,
                expires_at,
            })
            .await?;

        log::info!("Issued {} code {} for {}", purpose, record.id, email);

        Ok(IssuedOtp {
            record_id: record.id,
            code,
            expires_at: record.expires_at,
        })
    }

    /// Check a candidate code against the newest active record
    pub async fn verify(
        &self,
        email: &str,
        purpose: OtpPurpose,
        candidate: &str,
    ) -> AppResult<VerificationOutcome> {
        self.verify_at(email, purpose, candidate, Utc::now()).await
    }

    /// Same as [`OtpLedger::verify`] with an explicit clock
    ///
    /// Checks run in a fixed order: missing, expired, exhausted, mismatch.
    /// Only a mismatch touches the attempt counter and only a match consumes.
    pub async fn verify_at(
        &self,
        email: &str,
        purpose: OtpPurpose,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> AppResult<VerificationOutcome> {
        let Some(record) = self.store.latest_unused(email, purpose).await? else {
            return Ok(VerificationOutcome::NoOtpFound);
        };

        if record.is_expired_at(now) {
            return Ok(VerificationOutcome::Expired);
        }

        if record.attempts >= self.config.max_attempts {
            return Ok(VerificationOutcome::AttemptsExceeded);
        }

        let matches = self
            .hasher
            .verify_async(candidate.to_string(), record.otp_hash.clone())
            .await?;

        if !matches {
            match self
                .store
                .record_failed_attempt(record.id, self.config.max_attempts)
                .await?
            {
                Some(attempts) => log::debug!(
                    "Wrong code for {} ({}/{} attempts)",
                    record.id,
                    attempts,
                    self.config.max_attempts
                ),
                None => log::debug!("Attempt guard failed for {}", record.id),
            }
            return Ok(VerificationOutcome::CodeInvalid);
        }

        if self.store.consume(record.id, now).await? {
            Ok(VerificationOutcome::Verified)
        } else {
            // Lost the race to a concurrent verification of the same code
            Ok(VerificationOutcome::NoOtpFound)
        }
    }

    /// Delete used and expired records
    pub async fn purge_expired(&self) -> AppResult<u64> {
        let purged = self.store.purge_expired(Utc::now()).await?;
        log::info!("Purged {} expired or used OTP records", purged);
        Ok(purged)
    }

    pub async fn health_check(&self) -> AppResult<()> {
        Ok(self.store.health_check().await?)
    }
}
