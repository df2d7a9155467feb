//! Service Layer
//!
//! Business logic for the customer auth service.

pub mod auth;
pub mod email_service;
pub mod jwt;
pub mod otp_ledger;
pub mod rate_limit_service;

// Re-export services
pub use auth::{AuthService, AuthServiceError, Registration, Session, VerifyOtpSuccess};
pub use email_service::{EmailDispatcher, LogMailer, Mailer, OtpEmailRenderer, SmtpMailer};
pub use jwt::{JwtError, JwtService};
pub use otp_ledger::OtpLedger;
pub use rate_limit_service::{RateLimitError, RateLimitService, RateLimitedEndpoint};
