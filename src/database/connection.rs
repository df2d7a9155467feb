//! Postgres Pool
//!
//! Pool settings for the Postgres backend and the embedded migrations.

use sqlx::PgPool;
use std::time::Duration;

use crate::config::env;
use crate::database::store::StoreResult;

/// Pool handed to [`crate::database::PgStore`]
pub type DatabasePool = PgPool;

/// Pool sizing and timeouts, read from `DB_*` variables
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl DatabaseConfig {
    /// Defaults for everything except the URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(3600),
        }
    }

    /// `DATABASE_URL` is required; everything else has a default
    pub fn from_env() -> Result<Self, env::EnvError> {
        let url = env::get_required("DATABASE_URL")?;

        Ok(Self {
            url,
            max_connections: env::get_u32("DB_MAX_CONNECTIONS", 10),
            min_connections: env::get_u32("DB_MIN_CONNECTIONS", 1),
            connect_timeout: Duration::from_secs(env::get_u64("DB_CONNECT_TIMEOUT", 10)),
            idle_timeout: Duration::from_secs(env::get_u64("DB_IDLE_TIMEOUT", 600)),
            max_lifetime: Duration::from_secs(env::get_u64("DB_MAX_LIFETIME", 3600)),
        })
    }

    /// Connect eagerly so a bad URL fails at startup
    pub async fn create_pool(&self) -> Result<PgPool, sqlx::Error> {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
            .connect(&self.url)
            .await
    }
}

/// Apply the embedded migrations
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::with_url("postgresql://localhost/customer_auth");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }
}
