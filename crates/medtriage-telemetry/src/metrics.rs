//! Prometheus metric names and descriptions

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

pub const HTTP_REQUESTS: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const PREDICTIONS: &str = "predictions_total";
pub const PREDICTION_DURATION: &str = "prediction_duration_seconds";
pub const PREDICTION_CONFIDENCE: &str = "prediction_confidence";
pub const MODEL_LOADED: &str = "model_loaded_status";
pub const CLASSIFIER_FALLBACKS: &str = "classifier_fallbacks_total";
pub const SECURITY_EVENTS: &str = "security_events_total";
pub const RATE_LIMIT_VIOLATIONS: &str = "rate_limit_violations_total";
pub const API_KEY_FAILURES: &str = "api_key_failures_total";
pub const INVALID_INPUTS: &str = "invalid_input_attempts_total";
pub const HEALTH_CHECKS: &str = "health_checks_total";
pub const STORAGE_CONNECTED: &str = "storage_connection_status";

/// Register descriptions for every metric the service emits
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS, "Total HTTP requests by method, path, and status");
    describe_histogram!(HTTP_REQUEST_DURATION, Unit::Seconds, "HTTP request duration");
    describe_counter!(PREDICTIONS, "Total predictions by class and source");
    describe_histogram!(PREDICTION_DURATION, Unit::Seconds, "Prediction duration");
    describe_histogram!(PREDICTION_CONFIDENCE, "Confidence scores of predictions");
    describe_gauge!(
        MODEL_LOADED,
        "Whether the ML model is loaded (1=loaded, 0=keyword rules)"
    );
    describe_counter!(
        CLASSIFIER_FALLBACKS,
        "Predictions served by a fallback path, by reason"
    );
    describe_counter!(SECURITY_EVENTS, "Total security events by type");
    describe_counter!(RATE_LIMIT_VIOLATIONS, "Total rate limit rejections");
    describe_counter!(API_KEY_FAILURES, "Total API key authentication failures");
    describe_counter!(INVALID_INPUTS, "Total rejected inputs by reason");
    describe_counter!(HEALTH_CHECKS, "Total health checks by status");
    describe_gauge!(
        STORAGE_CONNECTED,
        "Whether the prediction log is writable (1=connected, 0=not connected)"
    );
}
