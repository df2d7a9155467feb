//! Security Middleware
//!
//! Response hardening headers and per-endpoint rate limiting for the OTP
//! routes.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::service::rate_limit_service::{RateLimitError, RateLimitService, RateLimitedEndpoint};
use crate::utils::error::{AppError, ErrorResponse};
use crate::utils::security::SecurityHeaders;

/// State for one rate-limited route
#[derive(Clone)]
pub struct RateLimitState {
    pub service: Arc<RateLimitService>,
    pub endpoint: RateLimitedEndpoint,
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl RateLimitState {
    pub fn new(
        service: Arc<RateLimitService>,
        endpoint: RateLimitedEndpoint,
        trusted_proxies: Arc<[IpAddr]>,
    ) -> Self {
        Self {
            service,
            endpoint,
            trusted_proxies,
        }
    }
}

/// Middleware to add security headers to all responses
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    for (name, value) in SecurityHeaders::standard() {
        headers.insert(name, HeaderValue::from_static(value));
    }

    response
}

/// Who a request is counted against
///
/// The peer address, unless the peer is a trusted proxy. Then
/// `X-Forwarded-For` is walked from the right, past further trusted hops, to
/// the first address a trusted proxy saw. Hops left of that are
/// client-supplied and never used.
pub fn client_identifier(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> String {
    let Some(peer) = peer.map(|addr| addr.ip()) else {
        return "unknown".to_string();
    };

    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let forwarded = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .collect::<Vec<_>>();

    let mut client = peer;
    for hop in forwarded.into_iter().rev() {
        match hop.parse::<IpAddr>() {
            Ok(ip) => {
                client = ip;
                if !trusted_proxies.contains(&ip) {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    client.to_string()
}

/// Count the request and answer 429 with `Retry-After` once over the limit
pub async fn rate_limiting_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = client_identifier(request.headers(), peer, &state.trusted_proxies);

    match state.service.check_and_record(&identifier, state.endpoint).await {
        Ok(_status) => Ok(next.run(request).await),
        Err(RateLimitError::RateLimitExceeded { retry_after, .. }) => {
            let error_response = ErrorResponse::new(
                "RATE_LIMIT_EXCEEDED",
                "Too many requests. Please try again later.",
            );

            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, Json(error_response)).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }

            Ok(response)
        }
        Err(e) => {
            log::error!("Rate limiting error: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;
    use crate::service::rate_limit_service::{RateLimit, RateLimitConfig};
    use axum::{
        body::Body,
        http::{Method, Request},
        middleware::{from_fn, from_fn_with_state},
        routing::post,
        Router,
    };
    use tower::util::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    const PROXY: &str = "10.0.0.2";

    fn limited_app(max: u32) -> Router {
        let service = Arc::new(RateLimitService::new(
            Arc::new(MemoryStore::new()),
            RateLimitConfig {
                request_otp: RateLimit::new(max, 15),
                verify_otp: RateLimit::new(max, 15),
            },
            true,
        ));
        Router::new()
            .route("/limited", post(test_handler))
            .layer(from_fn_with_state(
                RateLimitState::new(
                    service,
                    RateLimitedEndpoint::RequestOtp,
                    Arc::from(vec![PROXY.parse::<IpAddr>().unwrap()]),
                ),
                rate_limiting_middleware,
            ))
    }

    /// A request arriving from `peer`, optionally carrying a forwarded chain
    fn request_from(peer: &str, forwarded: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::POST).uri("/limited");
        if let Some(chain) = forwarded {
            builder = builder.header("x-forwarded-for", chain);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = format!("{}:40000", peer).parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    fn proxies() -> Vec<IpAddr> {
        vec![PROXY.parse().unwrap(), "10.0.0.3".parse().unwrap()]
    }

    #[test]
    fn test_client_identifier_uses_peer_by_default() {
        let peer: SocketAddr = "192.168.1.7:5000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, Some(peer), &[]), "192.168.1.7");
        assert_eq!(client_identifier(&headers, None, &proxies()), "unknown");

        headers.insert("x-forwarded-for", "203.0.113.9".parse().unwrap());
        assert_eq!(client_identifier(&headers, Some(peer), &[]), "192.168.1.7");
        assert_eq!(client_identifier(&headers, Some(peer), &proxies()), "192.168.1.7");
    }

    #[test]
    fn test_client_identifier_behind_trusted_proxy() {
        let proxy: SocketAddr = format!("{}:443", PROXY).parse().unwrap();
        let mut headers = HeaderMap::new();

        // No header: the proxy itself is the client
        assert_eq!(client_identifier(&headers, Some(proxy), &proxies()), PROXY);

        // Spoofed left-most hop is ignored; the proxy-observed address wins
        headers.insert(
            "x-forwarded-for",
            "1.1.1.1, 203.0.113.9, 10.0.0.3".parse().unwrap(),
        );
        assert_eq!(
            client_identifier(&headers, Some(proxy), &proxies()),
            "203.0.113.9"
        );

        headers.insert("x-forwarded-for", "garbage".parse().unwrap());
        assert_eq!(client_identifier(&headers, Some(proxy), &proxies()), PROXY);
    }

    #[tokio::test]
    async fn test_security_headers_applied() {
        let app = Router::new()
            .route("/limited", post(test_handler))
            .layer(from_fn(security_headers_middleware));

        let response = app.oneshot(request_from("10.0.0.1", None)).await.unwrap();
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429_with_retry_after() {
        let app = limited_app(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(request_from("10.0.0.1", None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.clone().oneshot(request_from("10.0.0.1", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = response.headers()["retry-after"]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after > 0 && retry_after <= 15 * 60);

        let response = app.oneshot(request_from("10.0.0.9", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_header_still_limited() {
        let app = limited_app(5);

        let mut statuses = Vec::new();
        for i in 0..20 {
            let forwarded = format!("10.9.0.{}", i);
            let response = app
                .clone()
                .oneshot(request_from("198.51.100.4", Some(&forwarded)))
                .await
                .unwrap();
            statuses.push(response.status());
        }

        assert!(statuses[..5].iter().all(|s| *s == StatusCode::OK));
        assert!(statuses[5..]
            .iter()
            .all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_trusted_proxy_clients_counted_separately() {
        let app = limited_app(1);

        let first = app
            .clone()
            .oneshot(request_from(PROXY, Some("203.0.113.1")))
            .await
            .unwrap();
        let second = app
            .clone()
            .oneshot(request_from(PROXY, Some("203.0.113.2")))
            .await
            .unwrap();
        let repeat = app
            .oneshot(request_from(PROXY, Some("9.9.9.9, 203.0.113.1")))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
