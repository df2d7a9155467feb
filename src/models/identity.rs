//! Identity Model
//!
//! Customer identity records keyed by normalized email.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Authorization role carried in access tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Identity representation for external API responses
///
/// Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Internal identity row including the password hash
///
/// Used by the login flow and the stores. It is never serialized.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdentityWithPassword {
    pub id: Uuid,
    pub email: String,
    /// bcrypt hash; absent for OTP-only accounts
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    /// Stored as text, see [`Role::as_str`]
    pub role: String,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IdentityWithPassword {
    /// Unknown role strings degrade to the least privileged role
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_else(|e| {
            log::warn!("Identity {} has unrecognised role: {}", self.id, e);
            Role::Customer
        })
    }

    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }
}

impl From<IdentityWithPassword> for Identity {
    /// Strips the password hash
    fn from(row: IdentityWithPassword) -> Self {
        let role = row.role();
        Identity {
            id: row.id,
            email: row.email,
            full_name: row.full_name,
            role,
            is_verified: row.is_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Insert-or-merge input for [`crate::database::IdentityStore::upsert_by_email`]
///
/// On conflict `is_verified` becomes true if either side is true and
/// `full_name` keeps the stored value when this one is `None`. The password
/// hash and role are never touched.
#[derive(Debug, Clone)]
pub struct IdentityUpsert {
    pub email: String,
    pub full_name: Option<String>,
    pub is_verified: bool,
}
