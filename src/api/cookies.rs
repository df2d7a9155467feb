//! Session Cookies
//!
//! `Set-Cookie` values for the refresh token and a reader for request
//! cookies.

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

use crate::config::CookieConfig;
use crate::utils::error::{AppError, AppResult};

pub const REFRESH_COOKIE: &str = "refresh_token";

/// Optional access token cookie accepted by the session middleware
pub const ACCESS_COOKIE: &str = "access_token";

/// `HttpOnly; SameSite=Lax` refresh cookie living for `max_age_seconds`
pub fn refresh_cookie(
    config: &CookieConfig,
    token: &str,
    max_age_seconds: i64,
) -> AppResult<HeaderValue> {
    build(config, REFRESH_COOKIE, token, max_age_seconds)
}

/// Expires the refresh cookie on the client
pub fn clear_refresh_cookie(config: &CookieConfig) -> AppResult<HeaderValue> {
    build(config, REFRESH_COOKIE, "", 0)
}

fn build(config: &CookieConfig, name: &str, value: &str, max_age: i64) -> AppResult<HeaderValue> {
    let mut cookie = format!(
        "{}={}; Path={}; Max-Age={}; HttpOnly; SameSite=Lax",
        name, value, config.path, max_age
    );
    if config.secure {
        cookie.push_str("; Secure");
    }
    if let Some(domain) = &config.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }

    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("Invalid cookie header: {}", e)))
}

/// Value of the named cookie across every `Cookie` header
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_cookie_attributes() {
        let config = CookieConfig::default();
        let value = refresh_cookie(&config, "abc.def.ghi", 604800).unwrap();
        let value = value.to_str().unwrap();

        assert!(value.starts_with("refresh_token=abc.def.ghi;"));
        assert!(value.contains("Path=/api/auth"));
        assert!(value.contains("Max-Age=604800"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(!value.contains("Secure"));
        assert!(!value.contains("Domain"));
    }

    #[test]
    fn test_secure_cookie_with_domain() {
        let config = CookieConfig {
            secure: true,
            domain: Some("example.com".to_string()),
            path: "/".to_string(),
        };
        let value = refresh_cookie(&config, "t", 60).unwrap();
        let value = value.to_str().unwrap();

        assert!(value.contains("; Secure"));
        assert!(value.contains("; Domain=example.com"));
    }

    #[test]
    fn test_clear_cookie_expires_immediately() {
        let value = clear_refresh_cookie(&CookieConfig::default()).unwrap();
        let value = value.to_str().unwrap();
        assert!(value.starts_with("refresh_token=;"));
        assert!(value.contains("Max-Age=0"));
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; refresh_token=r1"));
        headers.append(COOKIE, HeaderValue::from_static("access_token=a1"));

        assert_eq!(read_cookie(&headers, REFRESH_COOKIE), Some("r1"));
        assert_eq!(read_cookie(&headers, ACCESS_COOKIE), Some("a1"));
        assert_eq!(read_cookie(&headers, "missing"), None);

        let mut empty = HeaderMap::new();
        empty.insert(COOKIE, HeaderValue::from_static("refresh_token="));
        assert_eq!(read_cookie(&empty, REFRESH_COOKIE), None);
    }
}
