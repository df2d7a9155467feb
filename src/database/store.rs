//! Store Traits
//!
//! Persistence seams for one-time codes, identities, and rate-limit counters.
//! Postgres and in-memory backends both implement every trait, so services
//! hold `Arc<dyn ...>` handles and never see the backend.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{IdentityUpsert, IdentityWithPassword, NewOtp, OtpPurpose, OtpRecord, Role};

/// Persistence errors shared by every backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Duplicate record: {0}")]
    Duplicate(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One-time code ledger persistence
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Mark every unused record for (email, purpose) as used and insert the
    /// new one, as a single atomic unit per pair
    async fn replace_active(&self, new: NewOtp) -> StoreResult<OtpRecord>;

    /// Most recently created unused record for the pair, expired or not
    async fn latest_unused(&self, email: &str, purpose: OtpPurpose)
        -> StoreResult<Option<OtpRecord>>;

    /// Increment `attempts` only while the record is unused and below
    /// `max_attempts`; returns the new count, or `None` if the guard failed
    async fn record_failed_attempt(&self, id: Uuid, max_attempts: i32) -> StoreResult<Option<i32>>;

    /// Set `used_at` only if it is still unset; `true` for the single winner
    async fn consume(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Delete records that are expired or used; returns how many went
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Durable identity records keyed by normalized email
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert or merge by email, see [`IdentityUpsert`] for conflict rules
    async fn upsert_by_email(&self, upsert: IdentityUpsert) -> StoreResult<IdentityWithPassword>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<IdentityWithPassword>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<IdentityWithPassword>>;

    /// Set the password hash unless one is already present; `false` if it was
    async fn set_password_if_absent(&self, id: Uuid, password_hash: &str) -> StoreResult<bool>;

    /// Create or promote an identity with the given role and password
    /// (operator provisioning only)
    async fn provision(
        &self,
        email: &str,
        full_name: Option<String>,
        password_hash: &str,
        role: Role,
    ) -> StoreResult<IdentityWithPassword>;
}

/// Counter state after recording one hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHit {
    pub attempt_count: u32,
    pub window_start: DateTime<Utc>,
}

/// Fixed-window rate-limit counters
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically count one hit for (identifier, endpoint), opening a new
    /// window when the stored one is older than `window`
    async fn hit(
        &self,
        identifier: &str,
        endpoint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitHit>;

    /// Drop counters whose window started before `before`
    async fn purge_stale(&self, before: DateTime<Utc>) -> StoreResult<u64>;
}
