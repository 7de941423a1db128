//! MedTriage Server
//!
//! HTTP front end for the medical focus-group classifier.
//!
//! Every request passes a fixed middleware pipeline (input sanitization,
//! trusted-host check, security headers, request logging, rate limiting,
//! CORS) before reaching the route handlers, which validate the submitted
//! text and hand it to the
//! [`ClassificationService`](medtriage_classifiers::ClassificationService).

pub mod config;
pub mod error;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod security;
pub mod state;
pub mod validation;

pub use config::ServiceConfig;
pub use error::AppError;
pub use rate_limit::{RateDecision, SlidingWindowLimiter};
pub use routes::create_router;
pub use state::AppState;
pub use validation::{InputValidator, ValidationError};
