//! PostgreSQL Store
//!
//! sqlx-backed implementation of the store traits. Every multi-step or
//! racy operation is either one conditional statement or one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::store::{
    IdentityStore, OtpStore, RateLimitHit, RateLimitStore, StoreError, StoreResult,
};
use crate::models::{IdentityUpsert, IdentityWithPassword, NewOtp, OtpPurpose, OtpRecord, Role};

const OTP_COLUMNS: &str = "id, email, otp_hash, purpose, attempts, expires_at, created_at, used_at";

const IDENTITY_COLUMNS: &str =
    "id, email, password_hash, full_name, role, is_verified, created_at, updated_at";

/// Postgres implementation of every store trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map unique violations onto a typed error, pass everything else through
fn map_unique_violation(err: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate(what.to_string());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl OtpStore for PgStore {
    async fn replace_active(&self, new: NewOtp) -> StoreResult<OtpRecord> {
        let mut tx = self.pool.begin().await?;

        // Serialize issuance per (email, purpose) for the rest of this transaction
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}:{}", new.email, new.purpose.as_str()))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE otps
            SET used_at = NOW()
            WHERE email = $1 AND purpose = $2 AND used_at IS NULL
            "#,
        )
        .bind(&new.email)
        .bind(new.purpose.as_str())
        .execute(&mut *tx)
        .await?;

        let record = sqlx::query_as::<_, OtpRecord>(&format!(
            r#"
            INSERT INTO otps (id, email, otp_hash, purpose, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            OTP_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.otp_hash)
        .bind(new.purpose.as_str())
        .bind(new.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(record)
    }

    async fn latest_unused(
        &self,
        email: &str,
        purpose: OtpPurpose,
    ) -> StoreResult<Option<OtpRecord>> {
        let record = sqlx::query_as::<_, OtpRecord>(&format!(
            r#"
            SELECT {}
            FROM otps
            WHERE email = $1 AND purpose = $2 AND used_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            OTP_COLUMNS
        ))
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn record_failed_attempt(&self, id: Uuid, max_attempts: i32) -> StoreResult<Option<i32>> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE otps
            SET attempts = attempts + 1
            WHERE id = $1 AND used_at IS NULL AND attempts < $2
            RETURNING attempts
            "#,
        )
        .bind(id)
        .bind(max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn consume(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE otps SET used_at = $2 WHERE id = $1 AND used_at IS NULL")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM otps WHERE used_at IS NOT NULL OR expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn upsert_by_email(&self, upsert: IdentityUpsert) -> StoreResult<IdentityWithPassword> {
        let identity = sqlx::query_as::<_, IdentityWithPassword>(&format!(
            r#"
            INSERT INTO identities (id, email, full_name, is_verified)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE SET
                is_verified = identities.is_verified OR EXCLUDED.is_verified,
                full_name = COALESCE(EXCLUDED.full_name, identities.full_name),
                updated_at = NOW()
            RETURNING {}
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&upsert.email)
        .bind(&upsert.full_name)
        .bind(upsert.is_verified)
        .fetch_one(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<IdentityWithPassword>> {
        let identity = sqlx::query_as::<_, IdentityWithPassword>(&format!(
            "SELECT {} FROM identities WHERE email = $1",
            IDENTITY_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<IdentityWithPassword>> {
        let identity = sqlx::query_as::<_, IdentityWithPassword>(&format!(
            "SELECT {} FROM identities WHERE id = $1",
            IDENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(identity)
    }

    async fn set_password_if_absent(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities
            SET password_hash = $2, updated_at = NOW()
            WHERE id = $1 AND password_hash IS NULL
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn provision(
        &self,
        email: &str,
        full_name: Option<String>,
        password_hash: &str,
        role: Role,
    ) -> StoreResult<IdentityWithPassword> {
        let identity = sqlx::query_as::<_, IdentityWithPassword>(&format!(
            r#"
            INSERT INTO identities (id, email, full_name, password_hash, role, is_verified)
            VALUES ($1, $2, $3, $4, $5, TRUE)
            ON CONFLICT (email) DO UPDATE SET
                password_hash = EXCLUDED.password_hash,
                role = EXCLUDED.role,
                is_verified = TRUE,
                full_name = COALESCE(EXCLUDED.full_name, identities.full_name),
                updated_at = NOW()
            RETURNING {}
            "#,
            IDENTITY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(&full_name)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, email))?;

        Ok(identity)
    }
}

#[async_trait]
impl RateLimitStore for PgStore {
    async fn hit(
        &self,
        identifier: &str,
        endpoint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<RateLimitHit> {
        let stale_before = now - window;

        let (attempt_count, window_start) = sqlx::query_as::<_, (i32, DateTime<Utc>)>(
            r#"
            INSERT INTO auth_rate_limits (identifier, endpoint, attempt_count, window_start, updated_at)
            VALUES ($1, $2, 1, $3, $3)
            ON CONFLICT (identifier, endpoint) DO UPDATE SET
                attempt_count = CASE
                    WHEN auth_rate_limits.window_start <= $4 THEN 1
                    ELSE auth_rate_limits.attempt_count + 1
                END,
                window_start = CASE
                    WHEN auth_rate_limits.window_start <= $4 THEN EXCLUDED.window_start
                    ELSE auth_rate_limits.window_start
                END,
                updated_at = EXCLUDED.updated_at
            RETURNING attempt_count, window_start
            "#,
        )
        .bind(identifier)
        .bind(endpoint)
        .bind(now)
        .bind(stale_before)
        .fetch_one(&self.pool)
        .await?;

        Ok(RateLimitHit {
            attempt_count: attempt_count.max(0) as u32,
            window_start,
        })
    }

    async fn purge_stale(&self, before: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM auth_rate_limits WHERE window_start < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
