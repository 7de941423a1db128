//! HTTP routes and handlers

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use medtriage_core::ClassificationResult;
use medtriage_telemetry::metrics as names;
use medtriage_telemetry::{PredictionRecord, SecurityEvent, SecurityEventKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, info, warn};

use crate::error::{handle_panic, AppError};
use crate::middleware;
use crate::security::client_identifier;
use crate::state::AppState;
use crate::validation::MAX_SPECIAL_CHAR_RATIO;

/// Security events listed by `/security/info`
const RECENT_EVENTS_SHOWN: usize = 10;

/// Build the router with the full middleware pipeline
pub fn create_router(state: AppState) -> Router {
    let security = &state.config.security;

    let pipeline = ServiceBuilder::new()
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::cors_layer(security))
        .layer(from_fn_with_state(state.clone(), middleware::sanitize_input))
        .layer(from_fn_with_state(state.clone(), middleware::trusted_host))
        .layer(from_fn_with_state(state.clone(), middleware::security_headers))
        .layer(from_fn_with_state(state.clone(), middleware::request_logging))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(DefaultBodyLimit::max(state.config.server.body_limit_bytes));

    Router::new()
        .route("/", get(root).fallback(method_not_allowed))
        .route("/health", get(health_check).fallback(method_not_allowed))
        .route(
            "/predict",
            post(predict)
                .route_layer(from_fn_with_state(
                    state.clone(),
                    middleware::require_api_key,
                ))
                .fallback(method_not_allowed),
        )
        .route("/metrics", get(metrics).fallback(method_not_allowed))
        .route(
            "/security/info",
            get(security_info).fallback(method_not_allowed),
        )
        .fallback(fallback)
        .layer(pipeline)
        .with_state(state)
}

/// Prediction request body
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub text: Option<String>,
}

/// Health report
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub classifier_mode: String,
    pub storage_connected: bool,
    pub security_enabled: bool,
    pub rate_limiting_enabled: bool,
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "Medical Text Classification API",
        "version": env!("CARGO_PKG_VERSION"),
        "classifier_mode": state.classifier.mode(),
        "model": state.classifier.model_name(),
        "endpoints": {
            "health": "/health",
            "predict": "/predict",
            "metrics": "/metrics",
            "security_info": "/security/info",
        },
    }))
}

/// 200 while the model is loaded, 503 while serving keyword rules
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let model_loaded = state.classifier.is_loaded();
    let (status, code) = if model_loaded {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    };

    metrics::counter!(names::HEALTH_CHECKS, "status" => status).increment(1);
    metrics::gauge!(names::MODEL_LOADED).set(if model_loaded { 1.0 } else { 0.0 });

    let security = &state.config.security;
    let body = HealthResponse {
        status: status.to_string(),
        model_loaded,
        classifier_mode: state.classifier.mode().to_string(),
        storage_connected: state.storage_connected(),
        security_enabled: security.enable_security_headers || state.trusted_hosts.is_enforced(),
        rate_limiting_enabled: true,
    };

    (code, Json(body))
}

async fn predict(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<ClassificationResult>, AppError> {
    let Json(request) = payload?;

    if state.config.model.require_model && !state.classifier.is_loaded() {
        return Err(AppError::ModelUnavailable);
    }

    let text = match state.validator.validate(request.text.as_deref()) {
        Ok(text) => text,
        Err(e) => {
            metrics::counter!(names::INVALID_INPUTS, "input_type" => e.input_type()).increment(1);
            if e.is_security_violation() {
                let client = client_identifier(&headers, peer.map(|ConnectInfo(addr)| addr));
                state.security.record(
                    SecurityEvent::new(SecurityEventKind::SuspiciousInputDetected)
                        .with_client(client)
                        .with_request("POST", "/predict")
                        .with_details(json!({ "reason": e.input_type(), "location": "body" })),
                );
            } else {
                debug!(reason = e.input_type(), "Prediction input rejected");
            }
            return Err(e.into());
        }
    };

    let start = Instant::now();
    let result = state.classifier.predict(&text).await?;
    let elapsed = start.elapsed();

    let class = result.predicted_class.as_str();
    let source = result.source.as_str();
    metrics::counter!(names::PREDICTIONS, "predicted_class" => class, "source" => source)
        .increment(1);
    metrics::histogram!(names::PREDICTION_DURATION).record(elapsed.as_secs_f64());
    metrics::histogram!(names::PREDICTION_CONFIDENCE).record(result.confidence);

    info!(
        class,
        confidence = result.confidence,
        source,
        text_length = text.chars().count(),
        duration_ms = elapsed.as_secs_f64() * 1000.0,
        "Prediction served"
    );

    if let Some(log) = state.prediction_log.clone() {
        if let Err(e) = log.record(PredictionRecord::new(&result, elapsed)).await {
            warn!(error = %e, "Prediction not recorded");
        }
    }

    Ok(Json(result))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics_handle.render(),
    )
}

async fn security_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let security = &state.config.security;
    let recent_events: Vec<_> = state
        .security
        .recent(RECENT_EVENTS_SHOWN)
        .into_iter()
        .map(|event| json!({ "event_type": event.kind.as_str(), "timestamp": event.timestamp }))
        .collect();

    Json(json!({
        "rate_limiting": {
            "enabled": true,
            "requests_per_window": security.rate_limit_requests,
            "window_seconds": security.rate_limit_window_secs,
            "tracked_clients": state.limiter.tracked_clients(),
        },
        "authentication": {
            "api_key_required": state.api_keys.is_required(),
            "api_keys_configured": state.api_keys.configured_keys(),
        },
        "security_headers": {
            "enabled": security.enable_security_headers,
        },
        "trusted_hosts": {
            "enforced": state.trusted_hosts.is_enforced(),
        },
        "input_validation": {
            "min_text_length": state.validator.min_length(),
            "max_text_length": state.validator.max_length(),
            "max_special_char_ratio": MAX_SPECIAL_CHAR_RATIO,
        },
        "audit": {
            "security_events_recorded": state.security.total(),
            "chain_intact": state.security.verify(),
            "recent_events": recent_events,
        },
    }))
}

async fn fallback() -> AppError {
    AppError::NotFound
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}
