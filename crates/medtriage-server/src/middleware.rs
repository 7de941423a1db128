//! Request middleware pipeline
//!
//! Stages, outermost first:
//!
//! 1. CORS
//! 2. Input sanitization (URL path and query)
//! 3. Trusted host
//! 4. Security response headers
//! 5. Request logging, request id, and HTTP metrics
//! 6. Rate limiting
//!
//! CORS sits outside every other stage so pre-flight requests are answered
//! before any check runs, and every response (rejections included) carries
//! the cross-origin headers. The API key check is a route layer on
//! `/predict` and runs after all of the above.

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use medtriage_telemetry::metrics as names;
use medtriage_telemetry::{SecurityEvent, SecurityEventKind};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, info};

use crate::config::SecurityConfig;
use crate::error::AppError;
use crate::rate_limit::RateDecision;
use crate::security::{client_identifier, ApiKeyFailure};
use crate::state::AppState;

/// Paths that are never rate limited
pub const RATE_LIMIT_EXEMPT_PATHS: &[&str] = &["/health", "/metrics"];

/// Header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const RATE_LIMIT_LIMIT_HEADER: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Headers whose values never reach the logs
const REDACTED_HEADERS: &[&str] = &["authorization", "x-api-key", "cookie"];

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains",
    ),
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' 'unsafe-inline'; style-src 'self' 'unsafe-inline'; \
         img-src 'self' data:; font-src 'self'; connect-src 'self'; frame-ancestors 'none'",
    ),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    (
        "permissions-policy",
        "geolocation=(), microphone=(), camera=(), payment=(), usb=(), magnetometer=(), \
         gyroscope=(), speaker=()",
    ),
];

/// Client id for a request: forwarded-for first, then the peer address
pub fn request_client(req: &Request) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_identifier(req.headers(), peer)
}

/// Security event pre-filled with the offending request's context
fn request_event(kind: SecurityEventKind, req: &Request) -> SecurityEvent {
    let mut event = SecurityEvent::new(kind)
        .with_client(request_client(req))
        .with_request(req.method().as_str(), req.uri().path());
    if let Some(agent) = user_agent(req.headers()) {
        event = event.with_user_agent(agent);
    }
    event
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok())
}

/// Reject requests whose URL carries injection or traversal signatures
pub async fn sanitize_input(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let uri = req.uri();
    if let Some(pattern) = state.url_scanner.scan(uri.path(), uri.query()) {
        state.security.record(
            request_event(SecurityEventKind::SuspiciousInputDetected, &req)
                .with_details(json!({ "pattern": pattern, "location": "url" })),
        );
        return Err(AppError::SuspiciousRequest);
    }

    Ok(next.run(req).await)
}

/// Reject requests whose Host header is not allowlisted
pub async fn trusted_host(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() == Method::OPTIONS || !state.trusted_hosts.is_enforced() {
        return Ok(next.run(req).await);
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host());

    if !state.trusted_hosts.is_allowed(host) {
        let host = host.unwrap_or("").to_string();
        state.security.record(
            request_event(SecurityEventKind::InvalidHostHeader, &req)
                .with_details(json!({ "host": host })),
        );
        return Err(AppError::InvalidHost);
    }

    Ok(next.run(req).await)
}

/// Add the fixed security headers to every response
pub async fn security_headers(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    if !state.config.security.enable_security_headers {
        return response;
    }

    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(*name, HeaderValue::from_static(*value));
    }
    response
}

/// Log each request and its outcome, tag it with a request id, and record HTTP metrics
pub async fn request_logging(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();

    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let log_requests = state.config.security.log_requests;

    if log_requests {
        info!(
            request_id = %request_id,
            method = %method,
            path = req.uri().path(),
            query = req.uri().query().unwrap_or(""),
            client = %request_client(&req),
            user_agent = user_agent(req.headers()).unwrap_or("unknown"),
            "Request received"
        );
        debug!(
            request_id = %request_id,
            headers = ?redacted_headers(req.headers()),
            "Request headers"
        );
    }

    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    metrics::counter!(
        names::HTTP_REQUESTS,
        "method" => method.to_string(),
        "path" => path.clone(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(
        names::HTTP_REQUEST_DURATION,
        "method" => method.to_string(),
        "path" => path
    )
    .record(elapsed.as_secs_f64());

    if log_requests {
        info!(
            request_id = %request_id,
            status = status.as_u16(),
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            "Request completed"
        );
    }

    response
}

/// Header list for logging, with credentials masked
pub fn redacted_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[binary]").to_string()
            };
            (name.as_str().to_string(), value)
        })
        .collect()
}

/// Per-client sliding-window rate limiting
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if req.method() == Method::OPTIONS || RATE_LIMIT_EXEMPT_PATHS.contains(&req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let client = request_client(&req);
    match state.limiter.check(&client) {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(limit));
            headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
            Ok(response)
        }
        RateDecision::Limited { limit, retry_after } => {
            metrics::counter!(names::RATE_LIMIT_VIOLATIONS).increment(1);
            state.security.record(
                request_event(SecurityEventKind::RateLimitExceeded, &req).with_details(json!({
                    "limit": limit,
                    "window_seconds": retry_after.as_secs(),
                })),
            );
            Err(AppError::RateLimited {
                limit,
                window_secs: retry_after.as_secs(),
            })
        }
    }
}

/// Require a valid X-API-Key header when the policy demands one
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req.headers().get("x-api-key").and_then(|v| v.to_str().ok());

    if let Err(failure) = state.api_keys.check(presented) {
        metrics::counter!(names::API_KEY_FAILURES, "reason" => failure.as_str()).increment(1);
        state.security.record(
            request_event(SecurityEventKind::AuthenticationFailure, &req)
                .with_details(json!({ "reason": failure.as_str() })),
        );
        return Err(match failure {
            ApiKeyFailure::Missing => AppError::MissingApiKey,
            ApiKeyFailure::Invalid => AppError::InvalidApiKey,
        });
    }

    Ok(next.run(req).await)
}

/// CORS policy from configuration.
///
/// A `*` origin allows any origin without credentials; otherwise only the
/// listed origins are allowed and credentials are permitted.
pub fn cors_layer(config: &SecurityConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ORIGIN,
            header::ACCESS_CONTROL_REQUEST_METHOD,
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderName::from_static("x-api-key"),
        ])
        .expose_headers([
            HeaderName::from_static(RATE_LIMIT_LIMIT_HEADER),
            HeaderName::from_static(RATE_LIMIT_REMAINING_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    if config.allows_any_origin() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
