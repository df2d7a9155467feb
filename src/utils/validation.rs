//! Validation Utilities
//!
//! Input validation functions for identity data and API requests.

use regex::Regex;
use std::sync::OnceLock;
use validator::ValidationError;

/// Loose syntactic check on an address; surrounding whitespace is ignored
pub fn validate_email(email: &str) -> bool {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("email pattern is valid")
    });

    regex.is_match(email.trim())
}

/// Canonical form used as the ledger and identity key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Display names: 1 to 255 characters of letters and a little punctuation
pub fn validate_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || name.len() > 255 {
        return false;
    }

    // Letters (any script), spaces, hyphens, apostrophes and periods
    static NAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = NAME_REGEX
        .get_or_init(|| Regex::new(r"^[\p{L}\s\-'.]+$").expect("name pattern is valid"));

    regex.is_match(name)
}

/// Validates that a submitted one-time code is all digits
pub fn validate_otp_format(code: &str) -> bool {
    !code.is_empty() && code.len() <= 12 && code.chars().all(|c| c.is_ascii_digit())
}

/// `validator` hook for address fields
pub fn email_validator(email: &str) -> Result<(), ValidationError> {
    if validate_email(email) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_email").with_message(messages::INVALID_EMAIL.into()))
    }
}

/// `validator` hook for `full_name`
pub fn name_validator(name: &str) -> Result<(), ValidationError> {
    if validate_name(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_name").with_message(messages::INVALID_NAME.into()))
    }
}

/// `validator` hook for submitted codes
pub fn otp_validator(code: &str) -> Result<(), ValidationError> {
    if validate_otp_format(code) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_otp").with_message(messages::INVALID_OTP.into()))
    }
}

/// Flatten validator errors into a single readable message
pub fn describe_validation_errors(err: &validator::ValidationErrors) -> String {
    let mut parts: Vec<String> = err
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| match &error.message {
                Some(message) => format!("{}: {}", field, message),
                None => format!("{}: invalid value", field),
            })
        })
        .collect();

    parts.sort();
    parts.join(", ")
}

/// Messages returned to clients for rejected fields
pub mod messages {
    pub const INVALID_EMAIL: &str = "Please enter a valid email address";
    pub const INVALID_NAME: &str =
        "Name must contain only letters, spaces, hyphens, periods, and apostrophes";
    pub const INVALID_OTP: &str = "Code must contain only digits";
}
