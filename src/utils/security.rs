//! Security Utilities
//!
//! Credential hashing, one-time code generation, and security headers.

use bcrypt::{hash, verify, BcryptError};
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng};

use crate::utils::error::{AppError, AppResult};

/// Default bcrypt cost for hashing passwords and OTP codes
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Lowest cost the configuration layer accepts for production use
pub const MIN_PRODUCTION_BCRYPT_COST: u32 = 10;

/// Cost range bcrypt itself accepts
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

/// One-way salted hashing shared by OTP codes and account passwords
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    cost: u32,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_BCRYPT_COST,
        }
    }
}

impl CredentialHasher {
    /// Create a hasher with an explicit bcrypt cost (4..=31)
    pub fn new(cost: u32) -> Result<Self, BcryptError> {
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
            return Err(BcryptError::CostNotAllowed(cost));
        }
        Ok(Self { cost })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a secret with a fresh salt
    pub fn hash(&self, secret: &str) -> Result<String, BcryptError> {
        hash(secret, self.cost)
    }

    /// Verify a secret against a stored hash; malformed hashes never match
    pub fn verify(&self, secret: &str, hashed: &str) -> bool {
        match verify(secret, hashed) {
            Ok(matches) => matches,
            Err(e) => {
                log::warn!("Stored credential hash could not be parsed: {}", e);
                false
            }
        }
    }

    /// Hash on the blocking pool so request tasks keep making progress
    pub async fn hash_async(&self, secret: String) -> AppResult<String> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))?
            .map_err(AppError::from)
    }

    /// Verify on the blocking pool
    pub async fn verify_async(&self, secret: String, hashed: String) -> AppResult<bool> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.verify(&secret, &hashed))
            .await
            .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))
    }
}

/// Generate a numeric one-time code of `length` digits from the OS CSPRNG
///
/// Each digit is drawn independently and uniformly, so leading zeros are
/// as likely as any other digit.
pub fn generate_numeric_otp(length: usize) -> String {
    (0..length)
        .map(|_| char::from(b'0' + OsRng.gen_range(0..10u8)))
        .collect()
}

/// Check if a timestamp has passed relative to `now`
pub fn is_expired_at(expiry: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > expiry
}

/// Security headers for HTTP responses
pub struct SecurityHeaders;

impl SecurityHeaders {
    /// Get standard security headers as a vector of tuples
    pub fn standard() -> Vec<(&'static str, &'static str)> {
        vec![
            ("X-Content-Type-Options", "nosniff"),
            ("X-Frame-Options", "DENY"),
            ("Referrer-Policy", "strict-origin-when-cross-origin"),
            (
                "Permissions-Policy",
                "geolocation=(), microphone=(), camera=()",
            ),
            (
                "Strict-Transport-Security",
                "max-age=31536000; includeSubDomains",
            ),
            (
                "Content-Security-Policy",
                "default-src 'none'; frame-ancestors 'none'",
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_hasher() -> CredentialHasher {
        CredentialHasher::new(MIN_BCRYPT_COST).unwrap()
    }

    #[test]
    fn test_generate_numeric_otp() {
        let otp = generate_numeric_otp(6);
        assert_eq!(otp.len(), 6);
        assert!(otp.chars().all(|c| c.is_ascii_digit()));

        let longer = generate_numeric_otp(8);
        assert_eq!(longer.len(), 8);
    }

    #[test]
    fn test_generated_codes_vary() {
        let codes: std::collections::HashSet<String> =
            (0..20).map(|_| generate_numeric_otp(8)).collect();
        assert!(codes.len() > 1);
    }

    #[test]
    fn test_hash_round_trip() {
        let hasher = fast_hasher();
        let hashed = hasher.hash("123456").unwrap();

        assert_ne!(hashed, "123456");
        assert!(hasher.verify("123456", &hashed));
        assert!(!hasher.verify("654321", &hashed));
    }

    #[test]
    fn test_hash_is_salted() {
        let hasher = fast_hasher();
        let first = hasher.hash("SecurePass123!").unwrap();
        let second = hasher.hash("SecurePass123!").unwrap();

        assert_ne!(first, second);
        assert!(hasher.verify("SecurePass123!", &first));
        assert!(hasher.verify("SecurePass123!", &second));
    }

    #[test]
    fn test_malformed_hash_does_not_verify() {
        let hasher = fast_hasher();
        assert!(!hasher.verify("123456", "not-a-bcrypt-hash"));
    }

    #[test]
    fn test_invalid_cost_rejected() {
        assert!(CredentialHasher::new(MIN_BCRYPT_COST - 1).is_err());
        assert!(CredentialHasher::new(MAX_BCRYPT_COST + 1).is_err());
        assert!(CredentialHasher::new(MIN_BCRYPT_COST).is_ok());
        assert!(CredentialHasher::new(MAX_BCRYPT_COST).is_ok());
        assert_eq!(CredentialHasher::default().cost(), DEFAULT_BCRYPT_COST);
    }

    #[tokio::test]
    async fn test_async_round_trip() {
        let hasher = fast_hasher();
        let hashed = hasher.hash_async("hunter2hunter2".into()).await.unwrap();

        assert!(hasher
            .verify_async("hunter2hunter2".into(), hashed.clone())
            .await
            .unwrap());
        assert!(!hasher.verify_async("other".into(), hashed).await.unwrap());
    }

    #[test]
    fn test_expiry_helpers() {
        let now = Utc::now();
        assert!(is_expired_at(now - chrono::Duration::seconds(1), now));
        assert!(!is_expired_at(now + chrono::Duration::minutes(5), now));
        assert!(!is_expired_at(now, now));
    }

    #[test]
    fn test_security_headers() {
        let headers = SecurityHeaders::standard();
        assert!(headers.iter().any(|(name, _)| *name == "X-Frame-Options"));
    }
}
