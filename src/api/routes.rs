//! API Route Definitions
//!
//! Routes and their handlers, assembled by [`RouterBuilder`] so a deployment
//! can expose only the endpoint groups it needs. Auth routes live under
//! `/api/auth`, the maintenance hook under `/api/admin`.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};

use super::handlers::*;
use super::middleware::{auth_middleware, require_admin};
use super::security_middleware::{
    rate_limiting_middleware, security_headers_middleware, RateLimitState,
};
use crate::service::RateLimitedEndpoint;

/// Builder for creating API routes with configurable endpoint groups
#[derive(Default)]
pub struct RouterBuilder {
    /// GET /health
    health_check: bool,
    /// POST /api/auth/request-otp and /api/auth/verify-otp
    otp: bool,
    /// POST /api/auth/register and /api/auth/login
    password: bool,
    /// POST /api/auth/refresh, /api/auth/logout and GET /api/auth/me
    session: bool,
    /// POST /api/admin/otps/purge
    admin: bool,
}

impl RouterBuilder {
    /// Creates a new router builder with all routes disabled by default
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_all_routes() -> Self {
        Self {
            health_check: true,
            otp: true,
            password: true,
            session: true,
            admin: true,
        }
    }

    /// Passwordless deployments: codes and sessions, no password endpoints
    pub fn with_otp_only_routes() -> Self {
        Self {
            health_check: true,
            otp: true,
            password: false,
            session: true,
            admin: false,
        }
    }

    /// Only the health check endpoint
    pub fn with_minimal_routes() -> Self {
        Self {
            health_check: true,
            ..Self::default()
        }
    }

    pub fn health_check(mut self, enabled: bool) -> Self {
        self.health_check = enabled;
        self
    }

    pub fn otp(mut self, enabled: bool) -> Self {
        self.otp = enabled;
        self
    }

    pub fn password(mut self, enabled: bool) -> Self {
        self.password = enabled;
        self
    }

    pub fn session(mut self, enabled: bool) -> Self {
        self.session = enabled;
        self
    }

    pub fn admin(mut self, enabled: bool) -> Self {
        self.admin = enabled;
        self
    }

    /// Build the router with the configured routes
    pub fn build(self, state: AppState) -> Router {
        let mut router = Router::new();

        if self.health_check {
            router = router.route("/health", get(health_check));
        }

        if self.otp || self.password || self.session {
            router = router.nest("/api/auth", self.auth_routes(&state));
        }

        if self.admin {
            let admin = Router::new()
                .route("/otps/purge", post(purge_otps))
                .route_layer(from_fn(require_admin))
                .route_layer(from_fn_with_state(state.jwt(), auth_middleware));
            router = router.nest("/api/admin", admin);
        }

        router
            .layer(from_fn(security_headers_middleware))
            .with_state(state)
    }

    fn auth_routes(&self, state: &AppState) -> Router<AppState> {
        let mut auth = Router::new();

        if self.otp {
            let request_limit = RateLimitState::new(
                state.rate_limiter.clone(),
                RateLimitedEndpoint::RequestOtp,
                state.trusted_proxies.clone(),
            );
            let verify_limit = RateLimitState::new(
                state.rate_limiter.clone(),
                RateLimitedEndpoint::VerifyOtp,
                state.trusted_proxies.clone(),
            );
            auth = auth
                .route(
                    "/request-otp",
                    post(request_otp)
                        .layer(from_fn_with_state(request_limit, rate_limiting_middleware)),
                )
                .route(
                    "/verify-otp",
                    post(verify_otp)
                        .layer(from_fn_with_state(verify_limit, rate_limiting_middleware)),
                );
        }

        if self.password {
            auth = auth
                .route("/register", post(register))
                .route("/login", post(login));
        }

        if self.session {
            let protected = Router::new()
                .route("/me", get(me))
                .route_layer(from_fn_with_state(state.jwt(), auth_middleware));
            auth = auth
                .route("/refresh", post(refresh))
                .route("/logout", post(logout))
                .merge(protected);
        }

        auth
    }
}

/// Creates the router with every endpoint group enabled
pub fn create_routes(state: AppState) -> Router {
    RouterBuilder::with_all_routes().build(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::service::jwt::INVALID_TOKEN_MESSAGE;
    use crate::database::MemoryStore;
    use crate::models::Role;
    use crate::test_utils::{wait_for_code, RecordingMailer};
    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{
            header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
            Method, Request, Response, StatusCode,
        },
    };
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tower::util::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        router: Router,
        state: AppState,
        mailer: Arc<RecordingMailer>,
    }

    fn test_app_with(builder: RouterBuilder) -> TestApp {
        test_app_configured(builder, |_| {})
    }

    fn test_app_configured(
        builder: RouterBuilder,
        configure: impl FnOnce(&mut AppConfig),
    ) -> TestApp {
        let mut config = AppConfig::in_memory("test_access_secret_key", "test_refresh_secret_key");
        config.security.bcrypt_cost = 4;
        config.email.retry_backoff_ms = 1;
        configure(&mut config);

        let mailer = Arc::new(RecordingMailer::default());
        let (state, _worker) =
            AppState::build(&config, Arc::new(MemoryStore::new()), mailer.clone()).unwrap();

        TestApp {
            router: builder.build(state.clone()),
            state,
            mailer,
        }
    }

    fn test_app() -> TestApp {
        test_app_with(RouterBuilder::with_all_routes())
    }

    impl TestApp {
        async fn call(&self, request: Request<Body>) -> Response<Body> {
            self.router.clone().oneshot(request).await.unwrap()
        }

        async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
            self.call(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn post_raw(
            &self,
            uri: &str,
            content_type: Option<&str>,
            body: &str,
        ) -> Response<Body> {
            let mut builder = Request::builder().method(Method::POST).uri(uri);
            if let Some(content_type) = content_type {
                builder = builder.header(CONTENT_TYPE, content_type);
            }
            self.call(builder.body(Body::from(body.to_string())).unwrap())
                .await
        }

        /// POST as if received over a connection from `peer`
        async fn post_json_from(
            &self,
            peer: &str,
            forwarded_for: &str,
            uri: &str,
            body: Value,
        ) -> Response<Body> {
            let mut request = Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", forwarded_for)
                .body(Body::from(body.to_string()))
                .unwrap();
            let addr: SocketAddr = format!("{}:50000", peer).parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
            self.call(request).await
        }

        async fn request_code(&self, email: &str, purpose: &str) -> String {
            let before = self.mailer.count();
            let response = self
                .post_json(
                    "/api/auth/request-otp",
                    json!({"email": email, "purpose": purpose}),
                )
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            wait_for_code(&self.mailer, email, before).await
        }
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn refresh_cookie_of(response: &Response<Body>) -> String {
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        set_cookie
            .split(';')
            .next()
            .unwrap()
            .trim()
            .to_string()
    }

    fn wrong_code(code: &str) -> String {
        if code == "000000" {
            "111111".to_string()
        } else {
            "000000".to_string()
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let response = app
            .call(Request::get("/health").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_request_otp_response() {
        let app = test_app();
        let response = app
            .post_json("/api/auth/request-otp", json!({"email": "a@example.com"}))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["message"], "OTP sent");
        assert_eq!(body["expires_in"], 600);
        assert!(body.get("otp").is_none());
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let app = test_app();
        let response = app
            .post_json("/api/auth/request-otp", json!({"email": "not-an-email"}))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_missing_field_is_validation_error() {
        let app = test_app();
        let response = app
            .post_json("/api/auth/verify-otp", json!({"email": "a@example.com"}))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "VALIDATION_ERROR");
        assert!(body["error"].as_str().unwrap().contains("otp"));
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_validation_errors() {
        let app = test_app();

        let response = app
            .post_raw(
                "/api/auth/login",
                None,
                r#"{"email":"a@example.com","password":"secret"}"#,
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

        let response = app
            .post_raw("/api/auth/request-otp", Some("application/json"), "{not json")
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let app = test_app_configured(RouterBuilder::with_all_routes(), |config| {
            config.otp.ttl_minutes = -1;
        });
        let code = app.request_code("late@example.com", "login").await;

        let response = app
            .post_json(
                "/api/auth/verify-otp",
                json!({"email": "late@example.com", "otp": code, "purpose": "login"}),
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["reason"], "expired");
        assert!(body.get("token").is_none());
    }

    #[tokio::test]
    async fn test_five_wrong_codes_then_too_many_attempts() {
        let app = test_app();
        let code = app.request_code("a@example.com", "signup").await;
        let wrong = wrong_code(&code);

        for _ in 0..5 {
            let response = app
                .post_json(
                    "/api/auth/verify-otp",
                    json!({"email": "a@example.com", "otp": wrong, "purpose": "signup"}),
                )
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert_eq!(body["ok"], false);
            assert_eq!(body["reason"], "invalid");
        }

        let response = app
            .post_json(
                "/api/auth/verify-otp",
                json!({"email": "a@example.com", "otp": code, "purpose": "signup"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "too_many_attempts");
    }

    #[tokio::test]
    async fn test_verify_without_code_is_no_otp() {
        let app = test_app();
        let response = app
            .post_json(
                "/api/auth/verify-otp",
                json!({"email": "nobody@example.com", "otp": "123456"}),
            )
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["reason"], "no_otp");
    }

    #[tokio::test]
    async fn test_signup_register_login_flow() {
        let app = test_app();
        let code = app.request_code("jane@example.com", "signup").await;

        let response = app
            .post_json(
                "/api/auth/verify-otp",
                json!({"email": "jane@example.com", "otp": code, "purpose": "signup"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "OTP verified");
        assert!(body.get("token").is_none());
        let registration_token = body["registration_token"].as_str().unwrap().to_string();

        let response = app
            .post_json(
                "/api/auth/register",
                json!({
                    "email": "jane@example.com",
                    "password": "correct horse battery",
                    "full_name": "Jane Doe",
                    "registration_token": registration_token,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(set_cookie.starts_with("refresh_token="));
        assert!(set_cookie.contains("HttpOnly"));
        let customer_id = body_json(response).await["customer_id"].clone();

        let response = app
            .post_json(
                "/api/auth/login",
                json!({"email": "jane@example.com", "password": "correct horse battery"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["customer_id"], customer_id);
        let token = body["token"].as_str().unwrap().to_string();

        let response = app
            .call(
                Request::get("/api/auth/me")
                    .header(AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["user"]["email"], "jane@example.com");
        assert_eq!(body["user"]["is_verified"], true);
        assert!(body["user"].get("password_hash").is_none());

        let response = app
            .post_json(
                "/api/auth/login",
                json!({"email": "jane@example.com", "password": "not the password"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], "AUTHENTICATION_ERROR");
        assert_eq!(body["error"], "Invalid credentials");

        let response = app
            .post_json(
                "/api/auth/register",
                json!({
                    "email": "jane@example.com",
                    "password": "another password",
                    "registration_token": registration_token,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_login_code_sets_cookie_and_refresh_rotates() {
        let app = test_app();
        let code = app.request_code("otp@example.com", "login").await;

        let response = app
            .post_json(
                "/api/auth/verify-otp",
                json!({"email": "otp@example.com", "otp": code, "purpose": "login"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = refresh_cookie_of(&response);
        let body = body_json(response).await;
        assert!(body["token"].is_string());
        assert!(body.get("registration_token").is_none());

        let response = app
            .call(
                Request::post("/api/auth/refresh")
                    .header(COOKIE, cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(refresh_cookie_of(&response).starts_with("refresh_token="));
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert!(body["token"].is_string());

        let response = app
            .call(Request::post("/api/auth/refresh").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], INVALID_TOKEN_MESSAGE);

        let response = app
            .call(Request::post("/api/auth/logout").body(Body::empty()).unwrap())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(set_cookie.contains("Max-Age=0"));
        assert_eq!(body_json(response).await["ok"], true);
    }

    #[tokio::test]
    async fn test_me_requires_session() {
        let app = test_app();
        let response = app
            .call(Request::get("/api/auth/me").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], INVALID_TOKEN_MESSAGE);
    }

    #[tokio::test]
    async fn test_request_otp_rate_limited() {
        let app = test_app();
        for _ in 0..5 {
            let response = app
                .post_json("/api/auth/request-otp", json!({"email": "a@example.com"}))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .post_json("/api/auth/request-otp", json!({"email": "a@example.com"}))
            .await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        assert_eq!(body_json(response).await["code"], "RATE_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn test_forwarded_header_does_not_reset_limit() {
        let app = test_app();

        let mut statuses = Vec::new();
        for i in 0..8 {
            let response = app
                .post_json_from(
                    "198.51.100.20",
                    &format!("10.0.0.{}", i),
                    "/api/auth/request-otp",
                    json!({"email": "flood@example.com"}),
                )
                .await;
            statuses.push(response.status());
        }

        assert!(statuses[..5].iter().all(|s| *s == StatusCode::OK));
        assert!(statuses[5..]
            .iter()
            .all(|s| *s == StatusCode::TOO_MANY_REQUESTS));

        // A different peer has its own window
        let response = app
            .post_json_from(
                "198.51.100.21",
                "10.0.0.1",
                "/api/auth/request-otp",
                json!({"email": "flood@example.com"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_purge_requires_admin_role() {
        let app = test_app();
        let jwt = app.state.jwt();
        let customer = jwt
            .issue_access(Uuid::new_v4(), "c@example.com", Role::Customer)
            .unwrap();
        let admin = jwt
            .issue_access(Uuid::new_v4(), "root@example.com", Role::Admin)
            .unwrap();

        let purge = |token: String| {
            Request::post("/api/admin/otps/purge")
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.call(purge(customer)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.call(purge(admin)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["purged"], 0);
    }

    #[tokio::test]
    async fn test_disabled_groups_are_not_routed() {
        let app = test_app_with(RouterBuilder::with_otp_only_routes());
        let response = app
            .post_json(
                "/api/auth/login",
                json!({"email": "a@example.com", "password": "whatever"}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let app = test_app_with(RouterBuilder::with_minimal_routes());
        let response = app
            .post_json("/api/auth/request-otp", json!({"email": "a@example.com"}))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
