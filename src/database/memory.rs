//! In-Memory Store
//!
//! Single-process backend for development and tests. One mutex guards all
//! state, which gives every operation the same atomicity the Postgres
//! backend gets from transactions and conditional updates.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::store::{IdentityStore, OtpStore, RateLimitHit, RateLimitStore, StoreResult};
use crate::models::{IdentityUpsert, IdentityWithPassword, NewOtp, OtpPurpose, OtpRecord, Role};

#[derive(Default)]
struct MemoryState {
    /// Insertion ordered, so the last match is the newest
    otps: Vec<OtpRecord>,
    identities: HashMap<Uuid, IdentityWithPassword>,
    rate_limits: HashMap<(String, String), RateLimitHit>,
}

impl MemoryState {
    fn identity_by_email_mut(&mut self, email: &str) -> Option<&mut IdentityWithPassword> {
        self.identities.values_mut().find(|i| i.email == email)
    }
}

/// In-memory implementation of every store trait
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of OTP records held, used or not
    pub async fn otp_count(&self) -> usize {
        self.state.lock().await.otps.len()
    }

    /// Look up a record by id regardless of state
    pub async fn otp_by_id(&self, id: Uuid) -> Option<OtpRecord> {
        self.state
            .lock()
            .await
            .otps
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }
}

#[async_trait]
impl OtpStore for MemoryStore {
    async fn replace_active(&self, new: NewOtp) -> StoreResult<OtpRecord> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let purpose = new.purpose.as_str();

        for record in state
            .otps
            .iter_mut()
            .filter(|r| r.email == new.email && r.purpose == purpose && r.used_at.is_none())
        {
            record.used_at = Some(now);
        }

        let record = OtpRecord {
            id: Uuid::new_v4(),
            email: new.email,
            otp_hash: new.otp_hash,
            purpose: purpose.to_string(),
            attempts: 0,
            expires_at: new.expires_at,
            created_at: now,
            used_at: None,
        };
        state.otps.push(record.clone());

        Ok(record)
    }

    async fn latest_unused(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> StoreResult<Option<OtpRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .otps
            .iter()
            .rev()
            .find(|r| r.email == email && r.purpose == purpose.as_str() && !r.is_used())
            .cloned())
    }

    async fn record_failed_attempt(&self, id: Uuid, max_attempts: i32) -> StoreResult<Option<i32>> {
        let mut state = self.state.lock().await;
        let record = state
            .otps
            .iter_mut()
            .find(|r| r.id == id && r.used_at.is_none() && r.attempts < max_attempts);

        Ok(record.map(|r| {
            r.attempts += 1;
            r.attempts
        }))
    }

    async fn consume(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state
            .otps
            .iter_mut()
            .find(|r| r.id == id && r.used_at.is_none())
        {
            Some(record) => {
                record.used_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.otps.len();
        state.otps.retain(|r| !r.is_used() && !r.is_expired_at(now));
        Ok((before - state.otps.len()) as u64)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn upsert_by_email(&self, upsert: IdentityUpsert) -> StoreResult<IdentityWithPassword> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(existing) = state.identity_by_email_mut(&upsert.email) {
            existing.is_verified = existing.is_verified || upsert.is_verified;
            if upsert.full_name.is_some() {
                existing.full_name = upsert.full_name;
            }
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let identity = IdentityWithPassword {
            id: Uuid::new_v4(),
            email: upsert.email,
            password_hash: None,
            full_name: upsert.full_name,
            role: Role::Customer.as_str().to_string(),
            is_verified: upsert.is_verified,
            created_at: now,
            updated_at: now,
        };
        state.identities.insert(identity.id, identity.clone());

        Ok(identity)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<IdentityWithPassword>> {
        let state = self.state.lock().await;
        Ok(state
            .identities
            .values()
            .find(|i| i.email == email)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<IdentityWithPassword>> {
        Ok(self.state.lock().await.identities.get(&id).cloned())
    }

    async fn set_password_if_absent(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        match state.identities.get_mut(&id) {
            Some(identity) if identity.password_hash.is_none() => {
                identity.password_hash = Some(password_hash.to_string());
                identity.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn provision(
        &self,
        email: &str,
        full_name: Option<String>,
        password_hash: &str,
        role: Role,
    ) -> StoreResult<IdentityWithPassword> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(existing) = state.identity_by_email_mut(email) {
            existing.password_hash = Some(password_hash.to_string());
            existing.role = role.as_str().to_string();
            existing.is_verified = true;
            if full_name.is_some() {
                existing.full_name = full_name;
            }
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let identity = IdentityWithPassword {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: Some(password_hash.to_string()),
            full_name,
            role: role.as_str().to_string(),
            is_verified: true,
            created_at: now,
            updated_at: now,
        };
        state.identities.insert(identity.id, identity.clone());

        Ok(identity)
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(
        &self,
        identifier: &str,
        endpoint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitHit> {
        let mut state = self.state.lock().await;
        let entry = state
            .rate_limits
            .entry((identifier.to_string(), endpoint.to_string()))
            .or_insert(RateLimitHit {
                attempt_count: 0,
                window_start: now,
            });

        if entry.window_start <= now - window {
            entry.attempt_count = 0;
            entry.window_start = now;
        }
        entry.attempt_count += 1;

        Ok(*entry)
    }

    async fn purge_stale(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let count = state.rate_limits.len();
        state.rate_limits.retain(|_, hit| hit.window_start >= before);
        Ok((count - state.rate_limits.len()) as u64)
    }
}
