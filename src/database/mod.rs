//! Database Module
//!
//! Store traits and their Postgres and in-memory backends, plus connection
//! management.

pub mod connection;
pub mod memory;
pub mod postgres;
pub mod store;

// Re-export commonly used types
pub use connection::{run_migrations, DatabaseConfig, DatabasePool};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    IdentityStore, OtpStore, RateLimitHit, RateLimitStore, StoreError, StoreResult,
};
