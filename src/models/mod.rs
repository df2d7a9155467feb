//! Data Models Module
//!
//! This module contains all data structures used throughout the service:
//! identities, one-time code records, token claims, and request/response
//! types with validation.

pub mod auth;
pub mod identity;
pub mod otp;
pub mod requests;

// Re-export commonly used types
pub use auth::*;
pub use identity::*;
pub use otp::*;
pub use requests::*;
