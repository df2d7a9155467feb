//! Authentication Middleware
//!
//! Session checks for protected endpoints.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::api::cookies::{read_cookie, ACCESS_COOKIE};
use crate::models::UserContext;
use crate::service::jwt::INVALID_TOKEN_MESSAGE;
use crate::service::JwtService;
use crate::utils::error::AppError;

/// Extension type for storing authenticated user context in request extensions
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserContext);

/// Bearer token from `Authorization`, else the `access_token` cookie
fn access_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .or_else(|| read_cookie(headers, ACCESS_COOKIE))
}

/// Validates the access token and stores the caller in request extensions
///
/// Any missing, malformed, or expired token is a 401 before the handler runs.
pub async fn auth_middleware(
    State(jwt_service): State<Arc<JwtService>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = access_token(&headers)
        .ok_or_else(|| AppError::Authentication(INVALID_TOKEN_MESSAGE.into()))?;

    let user_context = jwt_service.verify_access(token)?;

    request.extensions_mut().insert(AuthUser(user_context));

    Ok(next.run(request).await)
}

/// Rejects callers without the admin role; layer it inside [`auth_middleware`]
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let user = extract_auth_user(&request)?;

    if !user.is_admin() {
        log::warn!("Identity {} denied admin access", user.user_id);
        return Err(AppError::Forbidden("Admin role required".into()));
    }

    Ok(next.run(request).await)
}

/// Helper function to extract authenticated user from request extensions
pub fn extract_auth_user(request: &Request) -> Result<&UserContext, AppError> {
    request
        .extensions()
        .get::<AuthUser>()
        .map(|auth_user| &auth_user.0)
        .ok_or_else(|| {
            AppError::Authentication("User context not found in request extensions".into())
        })
}
