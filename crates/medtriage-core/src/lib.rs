//! MedTriage Core
//!
//! Core types and utilities shared across MedTriage components.
//!
//! This crate provides:
//! - The fixed five-label category set used by every classifier
//! - The classification result shape and its probability invariants
//! - Error types and result handling

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Category, ClassificationResult, PredictionSource, Probabilities};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::{Category, ClassificationResult, PredictionSource, Probabilities};
}
