//! HTTP error responses
//!
//! Every rejection leaves the service as a JSON body with `error`,
//! `detail`, and `timestamp` fields. Internal failures never expose their
//! cause to the caller.

use crate::validation::ValidationError;
use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use medtriage_classifiers::ClassifyError;
use serde::Serialize;
use std::any::Any;
use tracing::error;

/// Errors returned by handlers and middleware
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("text is empty")]
    EmptyText,

    #[error("malicious content in request")]
    SuspiciousRequest,

    #[error("host header not allowed")]
    InvalidHost,

    #[error("API key missing")]
    MissingApiKey,

    #[error("API key invalid")]
    InvalidApiKey,

    #[error("rate limit exceeded")]
    RateLimited { limit: usize, window_secs: u64 },

    #[error("request body rejected: {detail}")]
    BadRequestBody { status: StatusCode, detail: String },

    #[error("model not loaded")]
    ModelUnavailable,

    #[error("no such endpoint")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(e) if e.is_unprocessable() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::EmptyText => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SuspiciousRequest | Self::InvalidHost => StatusCode::BAD_REQUEST,
            Self::MissingApiKey | Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequestBody { status, .. } => *status,
            Self::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (error, detail, retry_after) = match self {
            Self::Validation(e) => ("Invalid input", e.to_string(), None),
            Self::EmptyText => ("Invalid input", ClassifyError::EmptyInput.to_string(), None),
            Self::SuspiciousRequest => (
                "Invalid input detected",
                "Request contains potentially malicious content".to_string(),
                None,
            ),
            Self::InvalidHost => (
                "Invalid Host header",
                "The Host header is not allowed".to_string(),
                None,
            ),
            Self::MissingApiKey => (
                "Authentication required",
                "API key required. Please provide X-API-Key header.".to_string(),
                None,
            ),
            Self::InvalidApiKey => ("Authentication failed", "Invalid API key".to_string(), None),
            Self::RateLimited { limit, window_secs } => (
                "Rate limit exceeded",
                format!("Maximum {} requests per {} seconds", limit, window_secs),
                Some(*window_secs),
            ),
            Self::BadRequestBody { detail, .. } => ("Invalid request body", detail.clone(), None),
            Self::ModelUnavailable => (
                "Model not available",
                "The classification model is not loaded".to_string(),
                None,
            ),
            Self::NotFound => ("Not found", "No such endpoint".to_string(), None),
            Self::MethodNotAllowed => (
                "Method not allowed",
                "The endpoint does not support this method".to_string(),
                None,
            ),
            Self::Internal(_) => (
                "Internal server error",
                "Prediction failed. Please try again.".to_string(),
                None,
            ),
        };

        ErrorBody {
            error,
            detail,
            timestamp: chrono::Utc::now().to_rfc3339(),
            retry_after,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal(cause) = &self {
            error!(error = %cause, "Request failed");
        }

        let mut response = (self.status(), Json(self.body())).into_response();
        if let Self::RateLimited { window_secs, .. } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(window_secs));
        }
        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequestBody {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<ClassifyError> for AppError {
    fn from(e: ClassifyError) -> Self {
        match e {
            ClassifyError::EmptyInput => Self::EmptyText,
        }
    }
}

/// Turns a handler panic into a 500 with the standard error body
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::Internal(format!("handler panicked: {}", message)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let response = AppError::RateLimited {
            limit: 100,
            window_secs: 3600,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3600");

        let body = body_json(response).await;
        assert_eq!(body["error"], "Rate limit exceeded");
        assert_eq!(body["detail"], "Maximum 100 requests per 3600 seconds");
        assert_eq!(body["retry_after"], 3600);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let response = AppError::Internal("db password is hunter2".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("hunter2"));
    }

    #[test]
    fn test_validation_statuses() {
        assert_eq!(
            AppError::from(ValidationError::Missing).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(ValidationError::Empty).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(ValidationError::TooLong(5000)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(ClassifyError::EmptyInput).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[tokio::test]
    async fn test_panic_response() {
        let response = handle_panic(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal server error");
    }
}
