//! HTTP Request Handlers
//!
//! Axum handlers for the auth endpoints.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use tokio::task::JoinHandle;
use validator::Validate;

use crate::{
    api::{
        cookies::{clear_refresh_cookie, read_cookie, refresh_cookie, REFRESH_COOKIE},
        middleware::AuthUser,
    },
    config::{AppConfig, CookieConfig},
    database::{IdentityStore, OtpStore, RateLimitStore},
    models::requests::*,
    service::{
        AuthService, EmailDispatcher, JwtService, Mailer, OtpEmailRenderer, RateLimitService,
        jwt::INVALID_TOKEN_MESSAGE, Registration, Session, VerifyOtpSuccess,
    },
    utils::{
        error::{AppError, AppResult},
        security::CredentialHasher,
        validation::describe_validation_errors,
    },
    VERSION,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub rate_limiter: Arc<RateLimitService>,
    pub cookies: CookieConfig,
    /// Proxies allowed to name the client in `X-Forwarded-For`
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl AppState {
    /// Wire the services over one store backend and start the email worker
    pub fn build<S>(
        config: &AppConfig,
        store: Arc<S>,
        mailer: Arc<dyn Mailer>,
    ) -> AppResult<(Self, JoinHandle<()>)>
    where
        S: OtpStore + IdentityStore + RateLimitStore + 'static,
    {
        let hasher = CredentialHasher::new(config.security.bcrypt_cost)?;
        let jwt = Arc::new(JwtService::new(&config.jwt));
        let renderer = OtpEmailRenderer::new(config.email.app_name.clone())?;
        let (dispatcher, worker) = EmailDispatcher::spawn(mailer, &config.email);

        let auth_service = AuthService::new(
            store.clone(),
            store.clone(),
            jwt,
            hasher,
            config.otp.clone(),
            dispatcher,
            renderer,
        );
        let rate_limiter = RateLimitService::new(
            store,
            config.security.rate_limiting.limits,
            config.security.rate_limiting.enabled,
        );

        let state = Self {
            auth_service: Arc::new(auth_service),
            rate_limiter: Arc::new(rate_limiter),
            cookies: config.security.cookies.clone(),
            trusted_proxies: Arc::from(config.security.trusted_proxies.clone()),
        };

        Ok((state, worker))
    }

    pub fn jwt(&self) -> Arc<JwtService> {
        self.auth_service.jwt().clone()
    }

    /// Body plus rotated refresh cookie for a fresh session
    fn session_response(&self, session: Session) -> AppResult<Response> {
        let cookie = refresh_cookie(
            &self.cookies,
            &session.tokens.refresh_token,
            session.tokens.refresh_expires_in,
        )?;

        let body = SessionResponse {
            ok: true,
            token: session.tokens.access_token,
            customer_id: session.identity.id,
        };

        Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
    }
}

/// JSON body whose rejection is handled by [`validated`]
type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// Unwrap and validate a request body; malformed JSON, missing fields and a
/// wrong content type all become 400 validation errors
fn validated<T: Validate>(payload: JsonBody<T>) -> AppResult<T> {
    let Json(request) = payload.map_err(|rejection| {
        log::debug!("Rejected request body: {}", rejection.body_text());
        AppError::Validation(rejection.body_text())
    })?;

    request
        .validate()
        .map_err(|e| AppError::Validation(describe_validation_errors(&e)))?;

    Ok(request)
}

/// Issue a one-time code and queue its email
pub async fn request_otp(
    State(state): State<AppState>,
    payload: JsonBody<RequestOtpRequest>,
) -> AppResult<Json<RequestOtpResponse>> {
    let request = validated(payload)?;

    let requested = state
        .auth_service
        .request_otp(&request.email, request.purpose.unwrap_or_default())
        .await?;

    Ok(Json(RequestOtpResponse {
        ok: true,
        message: "OTP sent".to_string(),
        expires_in: requested.expires_in,
    }))
}

/// Verify a one-time code
///
/// A rejected code answers with `{ok: false, reason}` and the status for
/// that reason rather than an error body.
pub async fn verify_otp(
    State(state): State<AppState>,
    payload: JsonBody<VerifyOtpRequest>,
) -> AppResult<Response> {
    let request = validated(payload)?;

    let result = state
        .auth_service
        .verify_otp(
            &request.email,
            request.purpose.unwrap_or_default(),
            &request.otp,
        )
        .await?;

    match result {
        Err(reason) => {
            Ok((reason.status_code(), Json(OtpRejectionResponse::new(reason))).into_response())
        }
        Ok(VerifyOtpSuccess::Registration {
            identity,
            registration_token,
        }) => Ok(Json(VerifyOtpResponse {
            ok: true,
            message: "OTP verified".to_string(),
            registration_token: Some(registration_token),
            token: None,
            customer_id: Some(identity.id),
        })
        .into_response()),
        Ok(VerifyOtpSuccess::Session { identity, tokens }) => {
            let cookie =
                refresh_cookie(&state.cookies, &tokens.refresh_token, tokens.refresh_expires_in)?;
            let body = VerifyOtpResponse {
                ok: true,
                message: "OTP verified".to_string(),
                registration_token: None,
                token: Some(tokens.access_token),
                customer_id: Some(identity.id),
            };
            Ok(([(SET_COOKIE, cookie)], Json(body)).into_response())
        }
    }
}

/// Set a password using a registration token
pub async fn register(
    State(state): State<AppState>,
    payload: JsonBody<RegisterRequest>,
) -> AppResult<Response> {
    let request = validated(payload)?;

    let session = state
        .auth_service
        .register(Registration {
            email: request.email,
            password: request.password,
            full_name: request.full_name,
            registration_token: request.registration_token,
        })
        .await?;

    state.session_response(session)
}

/// Password login
pub async fn login(
    State(state): State<AppState>,
    payload: JsonBody<LoginRequest>,
) -> AppResult<Response> {
    let request = validated(payload)?;

    let session = state
        .auth_service
        .login(&request.email, &request.password)
        .await?;

    state.session_response(session)
}

/// Exchange the refresh cookie for a new token pair
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let token = read_cookie(&headers, REFRESH_COOKIE)
        .ok_or_else(|| AppError::Authentication(INVALID_TOKEN_MESSAGE.to_string()))?;

    let session = state.auth_service.refresh(token).await?;
    state.session_response(session)
}

/// Clear the refresh cookie
pub async fn logout(State(state): State<AppState>) -> AppResult<Response> {
    let cookie = clear_refresh_cookie(&state.cookies)?;
    Ok(([(SET_COOKIE, cookie)], Json(OkResponse { ok: true })).into_response())
}

/// Current identity; requires the session middleware
pub async fn me(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> AppResult<Json<MeResponse>> {
    let identity = state.auth_service.current_identity(user.user_id).await?;
    Ok(Json(MeResponse {
        ok: true,
        user: identity,
    }))
}

/// Delete used and expired codes; admin only
pub async fn purge_otps(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> AppResult<Json<PurgeResponse>> {
    let purged = state.auth_service.purge_expired_otps().await?;
    log::info!("Admin {} purged {} OTP records", user.user_id, purged);
    Ok(Json(PurgeResponse { ok: true, purged }))
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> AppResult<Json<HealthCheckResponse>> {
    state.auth_service.health_check().await?;

    Ok(Json(HealthCheckResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: VERSION.to_string(),
    }))
}
