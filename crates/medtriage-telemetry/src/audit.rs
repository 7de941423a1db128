//! Security events and their hash-chained audit log

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Log target for security events
pub const SECURITY_TARGET: &str = "medtriage::security";

/// Default number of events kept in memory
pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

/// Kinds of policy violations worth auditing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RateLimitExceeded,
    InvalidHostHeader,
    SuspiciousInputDetected,
    AuthenticationFailure,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::InvalidHostHeader => "invalid_host_header",
            Self::SuspiciousInputDetected => "suspicious_input_detected",
            Self::AuthenticationFailure => "authentication_failure",
        }
    }
}

/// A single recorded policy violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,

    /// Event-specific details
    pub details: serde_json::Value,

    /// Client identifier (forwarded-for or peer address)
    pub client: Option<String>,

    pub method: Option<String>,

    pub path: Option<String>,

    pub user_agent: Option<String>,

    pub timestamp: DateTime<Utc>,

    /// Hash of this event
    pub hash: Option<String>,

    /// Hash of previous event (for chaining)
    pub previous_hash: Option<String>,
}

impl SecurityEvent {
    /// Create a new event with empty details
    pub fn new(kind: SecurityEventKind) -> Self {
        Self {
            kind,
            details: serde_json::Value::Null,
            client: None,
            method: None,
            path: None,
            user_agent: None,
            timestamp: Utc::now(),
            hash: None,
            previous_hash: None,
        }
    }

    /// Set event details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Set the client identifier
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Set method and path of the offending request
    pub fn with_request(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self
    }

    /// Set user agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();

        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(self.details.to_string().as_bytes());
        for field in [&self.client, &self.method, &self.path, &self.user_agent] {
            if let Some(value) = field {
                hasher.update(value.as_bytes());
            }
        }
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Bounded audit log with hash-chained events for tamper detection.
///
/// When full, the oldest event is dropped; verification then starts from
/// the oldest retained event.
pub struct SecurityAuditLog {
    events: VecDeque<SecurityEvent>,
    chain_hash: Option<String>,
    capacity: usize,
    total: u64,
}

impl SecurityAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
            chain_hash: None,
            capacity: capacity.max(1),
            total: 0,
        }
    }

    /// Chain and append an event
    pub fn add_event(&mut self, mut event: SecurityEvent) {
        event.previous_hash = self.chain_hash.clone();
        let hash = event.compute_hash();
        event.hash = Some(hash.clone());

        self.chain_hash = Some(hash);
        self.events.push_back(event);
        self.total += 1;

        while self.events.len() > self.capacity {
            self.events.pop_front();
        }
    }

    /// Verify the integrity of the retained chain
    pub fn verify(&self) -> bool {
        let mut expected_prev = match self.events.front() {
            Some(first) => first.previous_hash.clone(),
            None => return true,
        };

        for event in &self.events {
            if event.previous_hash != expected_prev {
                return false;
            }
            if event.hash.as_deref() != Some(event.compute_hash().as_str()) {
                return false;
            }
            expected_prev = event.hash.clone();
        }

        true
    }

    /// Retained events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &SecurityEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events recorded since startup, including evicted ones
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for SecurityAuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}

/// Shared entry point for recording security events
#[derive(Clone, Default)]
pub struct SecurityMonitor {
    log: Arc<Mutex<SecurityAuditLog>>,
}

impl SecurityMonitor {
    pub fn new(capacity: usize) -> Self {
        Self {
            log: Arc::new(Mutex::new(SecurityAuditLog::new(capacity))),
        }
    }

    /// Log, count, and audit an event
    pub fn record(&self, event: SecurityEvent) {
        warn!(
            target: SECURITY_TARGET,
            event_type = event.kind.as_str(),
            client = event.client.as_deref().unwrap_or("unknown"),
            method = event.method.as_deref().unwrap_or("-"),
            path = event.path.as_deref().unwrap_or("-"),
            details = %event.details,
            "Security event"
        );
        metrics::counter!(crate::metrics::SECURITY_EVENTS, "event_type" => event.kind.as_str())
            .increment(1);

        self.log.lock().add_event(event);
    }

    /// Events recorded since startup
    pub fn total(&self) -> u64 {
        self.log.lock().total()
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let log = self.log.lock();
        let events: Vec<_> = log.events().cloned().collect();
        events.into_iter().rev().take(limit).collect()
    }

    /// Whether the retained chain is intact
    pub fn verify(&self) -> bool {
        self.log.lock().verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audit_chain() {
        let mut log = SecurityAuditLog::new(10);

        log.add_event(SecurityEvent::new(SecurityEventKind::RateLimitExceeded));
        log.add_event(
            SecurityEvent::new(SecurityEventKind::InvalidHostHeader)
                .with_details(json!({"host": "evil.example"})),
        );

        assert!(log.verify());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_tamper_detection() {
        let mut log = SecurityAuditLog::new(10);

        log.add_event(SecurityEvent::new(SecurityEventKind::SuspiciousInputDetected));
        log.add_event(SecurityEvent::new(SecurityEventKind::SuspiciousInputDetected));

        log.events[0].details = json!({"forged": true});
        assert!(!log.verify());
    }

    #[test]
    fn test_capacity_evicts_oldest_and_still_verifies() {
        let mut log = SecurityAuditLog::new(3);

        for _ in 0..5 {
            log.add_event(SecurityEvent::new(SecurityEventKind::AuthenticationFailure));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(log.total(), 5);
        assert!(log.verify());
    }

    #[test]
    fn test_monitor_records_newest_first() {
        let monitor = SecurityMonitor::new(10);

        monitor.record(
            SecurityEvent::new(SecurityEventKind::SuspiciousInputDetected).with_client("1.1.1.1"),
        );
        monitor.record(
            SecurityEvent::new(SecurityEventKind::RateLimitExceeded)
                .with_client("2.2.2.2")
                .with_request("POST", "/predict"),
        );

        let recent = monitor.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, SecurityEventKind::RateLimitExceeded);
        assert_eq!(monitor.total(), 2);
        assert!(monitor.verify());
    }
}
