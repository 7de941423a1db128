//! Request-level security checks
//!
//! Host allowlisting, API key verification, URL scanning for injection
//! signatures, and client identification for rate limiting and auditing.

use crate::config::SecurityConfig;
use aho_corasick::AhoCorasick;
use axum::http::HeaderMap;
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;
use subtle::ConstantTimeEq;

/// Signatures rejected anywhere in the request path or query string
pub const SUSPICIOUS_URL_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "<script",
    "javascript:",
    "data:",
    "vbscript:",
    "onload=",
    "onerror=",
    "onclick=",
    "eval(",
    "expression(",
    "union select",
    "drop table",
    "insert into",
    "delete from",
];

/// Scans request URLs for [`SUSPICIOUS_URL_PATTERNS`]
pub struct UrlScanner {
    matcher: AhoCorasick,
}

impl UrlScanner {
    pub fn new() -> Result<Self, aho_corasick::BuildError> {
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(SUSPICIOUS_URL_PATTERNS)?;
        Ok(Self { matcher })
    }

    /// First signature found in the path or query, raw or percent-decoded
    pub fn scan(&self, path: &str, query: Option<&str>) -> Option<&'static str> {
        let find = |haystack: &str| {
            self.matcher
                .find(haystack)
                .map(|m| SUSPICIOUS_URL_PATTERNS[m.pattern().as_usize()])
        };

        if let Some(found) = find(path) {
            return Some(found);
        }
        if let Some(found) = find(&percent_decode_str(path).decode_utf8_lossy()) {
            return Some(found);
        }

        let query = query?;
        if let Some(found) = find(query) {
            return Some(found);
        }

        // "%3Cscript" and "union+select" only show up once decoded
        url::form_urlencoded::parse(query.as_bytes())
            .find_map(|(key, value)| find(&key).or_else(|| find(&value)))
    }
}

/// Host header allowlist
#[derive(Debug, Clone)]
pub struct TrustedHosts {
    allow_any: bool,
    hosts: Vec<String>,
}

impl TrustedHosts {
    pub fn new(hosts: &[String]) -> Self {
        Self {
            allow_any: hosts.iter().any(|h| h == "*"),
            hosts: hosts.iter().map(|h| h.to_ascii_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(&config.allowed_hosts)
    }

    pub fn is_enforced(&self) -> bool {
        !self.allow_any
    }

    /// Whether a Host header value (port included or not) is accepted
    pub fn is_allowed(&self, host_header: Option<&str>) -> bool {
        if self.allow_any {
            return true;
        }

        let Some(host) = host_header.map(strip_port).filter(|h| !h.is_empty()) else {
            return false;
        };

        self.hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host))
    }
}

/// "example.org:8000" -> "example.org", "[::1]:8000" -> "::1"
fn strip_port(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        // a bare IPv6 address has more than one colon
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Why an API key was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyFailure {
    Missing,
    Invalid,
}

impl ApiKeyFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Invalid => "invalid",
        }
    }
}

/// API key requirement for the prediction endpoint
#[derive(Clone)]
pub struct ApiKeyPolicy {
    required: bool,
    keys: Vec<String>,
}

impl ApiKeyPolicy {
    pub fn new(required: bool, keys: Vec<String>) -> Self {
        Self {
            required,
            keys: keys.into_iter().filter(|k| !k.is_empty()).collect(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.require_api_key, config.api_keys.clone())
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn configured_keys(&self) -> usize {
        self.keys.len()
    }

    /// Check a presented key.
    ///
    /// With no keys configured any non-empty key is accepted. Comparison
    /// against the configured keys is constant-time.
    pub fn check(&self, presented: Option<&str>) -> Result<(), ApiKeyFailure> {
        if !self.required {
            return Ok(());
        }

        let key = presented
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ApiKeyFailure::Missing)?;

        if self.keys.is_empty() {
            return Ok(());
        }

        let matched = self
            .keys
            .iter()
            .fold(subtle::Choice::from(0u8), |acc, allowed| {
                acc | allowed.as_bytes().ct_eq(key.as_bytes())
            });

        if bool::from(matched) {
            Ok(())
        } else {
            Err(ApiKeyFailure::Invalid)
        }
    }
}

/// Client identity: first X-Forwarded-For entry, else the peer address
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
