//! MedTriage Telemetry
//!
//! Observability for the classification service.
//!
//! Provides:
//! - Security events with a hash-chained, bounded audit log
//! - Prometheus metric names and recording helpers
//! - An optional append-only prediction log

pub mod audit;
pub mod metrics;
pub mod sink;

pub use audit::{SecurityAuditLog, SecurityEvent, SecurityEventKind, SecurityMonitor};
pub use sink::{PredictionLog, PredictionRecord, SinkError};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::audit::{SecurityEvent, SecurityEventKind, SecurityMonitor};
    pub use crate::sink::{PredictionLog, PredictionRecord};
}
