//! Service configuration
//!
//! Values are layered: built-in defaults, then the YAML file, then
//! `MEDTRIAGE__<SECTION>__<KEY>` environment variables, then CLI flags.
//! List values in the environment are comma-separated.

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MEDTRIAGE";

const LIST_KEYS: [&str; 3] = [
    "security.allowed_hosts",
    "security.allowed_origins",
    "security.api_keys",
];

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub model: ModelSettings,

    #[serde(default)]
    pub prediction_log: PredictionLogConfig,
}

impl ServiceConfig {
    /// Load from an optional YAML file plus the process environment.
    ///
    /// The result is not validated; callers apply their overrides first and
    /// then call [`validate`](Self::validate).
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        Self::finish(builder.add_source(environment(None)))
    }

    fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    /// Reject configurations the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let security = &self.security;

        if security.rate_limit_requests == 0 {
            return Err(invalid("security.rate_limit_requests must be at least 1"));
        }
        if security.rate_limit_window_secs == 0 {
            return Err(invalid("security.rate_limit_window_secs must be at least 1"));
        }
        if security.max_tracked_clients == 0 {
            return Err(invalid("security.max_tracked_clients must be at least 1"));
        }
        if security.min_text_length == 0 {
            return Err(invalid("security.min_text_length must be at least 1"));
        }
        if security.max_text_length < security.min_text_length {
            return Err(invalid(
                "security.max_text_length must not be below security.min_text_length",
            ));
        }
        if security.allowed_hosts.is_empty() {
            return Err(invalid(
                "security.allowed_hosts must not be empty (use \"*\" to allow any host)",
            ));
        }
        if security.require_api_key && security.api_keys.is_empty() {
            tracing::warn!(
                "API keys are required but none are configured; any non-empty key is accepted"
            );
        }
        if self.server.body_limit_bytes == 0 {
            return Err(invalid("server.body_limit_bytes must be at least 1"));
        }
        if self.model.model_dir.is_some() && self.model.hf_repo.is_some() {
            return Err(invalid("model.model_dir and model.hf_repo are mutually exclusive"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Message(message.to_string())
}

fn environment(source: Option<config::Map<String, String>>) -> Environment {
    let mut env = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .source(source);
    for key in LIST_KEYS {
        env = env.with_list_parse_key(key);
    }
    env
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted request body
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Security policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Requests allowed per client per window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,

    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_secs: u64,

    /// Upper bound on clients tracked by the rate limiter
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,

    /// Accepted Host header values; `*` disables the check
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    /// CORS origins; `*` allows any origin without credentials
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default)]
    pub require_api_key: bool,

    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,

    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    #[serde(default = "default_true")]
    pub enable_security_headers: bool,

    #[serde(default = "default_true")]
    pub log_requests: bool,

    /// Security events kept in the in-memory audit log
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
}

impl SecurityConfig {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn allows_any_host(&self) -> bool {
        self.allowed_hosts.iter().any(|h| h == "*")
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window(),
            max_tracked_clients: default_max_tracked_clients(),
            allowed_hosts: default_allowed_hosts(),
            allowed_origins: default_allowed_origins(),
            api_keys: Vec::new(),
            require_api_key: false,
            min_text_length: default_min_text_length(),
            max_text_length: default_max_text_length(),
            enable_security_headers: true,
            log_requests: true,
            audit_capacity: default_audit_capacity(),
        }
    }
}

/// Where to find the fine-tuned model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Local checkpoint directory
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// HuggingFace Hub repository id
    #[serde(default)]
    pub hf_repo: Option<String>,

    #[serde(default)]
    pub revision: Option<String>,

    /// Label mapping file, when it lives outside the checkpoint directory
    #[serde(default)]
    pub label_mapping: Option<PathBuf>,

    /// "cpu", "cuda[:N]", or "metal[:N]"
    #[serde(default = "default_device")]
    pub device: String,

    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,

    /// Answer /predict with 503 instead of using keyword rules when no model is loaded
    #[serde(default)]
    pub require_model: bool,
}

impl ModelSettings {
    pub fn is_configured(&self) -> bool {
        self.model_dir.is_some() || self.hf_repo.is_some()
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_dir: None,
            hf_repo: None,
            revision: None,
            label_mapping: None,
            device: default_device(),
            max_sequence_length: default_max_sequence_length(),
            require_model: false,
        }
    }
}

/// Optional JSON-lines prediction log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionLogConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_prediction_log_path")]
    pub path: PathBuf,
}

impl Default for PredictionLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_prediction_log_path(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_body_limit() -> usize {
    64 * 1024
}

fn default_rate_limit_requests() -> usize {
    100
}

fn default_rate_limit_window() -> u64 {
    3600
}

fn default_max_tracked_clients() -> usize {
    10_000
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string()]
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_min_text_length() -> usize {
    1
}

fn default_max_text_length() -> usize {
    5000
}

fn default_audit_capacity() -> usize {
    1000
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_max_sequence_length() -> usize {
    512
}

fn default_prediction_log_path() -> PathBuf {
    PathBuf::from("./logs/predictions.jsonl")
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        environment(Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    fn layered(yaml: Option<&str>, pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let mut builder = Config::builder();
        if let Some(yaml) = yaml {
            builder = builder.add_source(File::from_str(yaml, FileFormat::Yaml));
        }
        ServiceConfig::finish(builder.add_source(env(pairs)))
    }

    fn build(yaml: Option<&str>, pairs: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let config = layered(yaml, pairs)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = build(None, &[]).unwrap();

        assert_eq!(config.server.port, 8000);
        assert_eq!(config.security.rate_limit_requests, 100);
        assert_eq!(config.security.rate_limit_window(), Duration::from_secs(3600));
        assert_eq!(config.security.allowed_hosts, vec!["localhost", "127.0.0.1"]);
        assert_eq!(config.security.allowed_origins, vec!["http://localhost:3000"]);
        assert_eq!(config.security.max_text_length, 5000);
        assert!(config.security.enable_security_headers);
        assert!(!config.security.require_api_key);
        assert!(!config.model.is_configured());
        assert!(!config.prediction_log.enabled);
    }

    #[test]
    fn test_yaml_file() {
        let yaml = r#"
server:
  port: 9100
security:
  rate_limit_requests: 3
  allowed_hosts: ["api.example.org"]
model:
  model_dir: ./model
"#;
        let config = build(Some(yaml), &[]).unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.listen, "0.0.0.0");
        assert_eq!(config.security.rate_limit_requests, 3);
        assert_eq!(config.security.rate_limit_window_secs, 3600);
        assert_eq!(config.security.allowed_hosts, vec!["api.example.org"]);
        assert_eq!(config.model.model_dir, Some(PathBuf::from("./model")));
    }

    #[test]
    fn test_environment_overrides_file() {
        let yaml = "security:\n  rate_limit_requests: 3\n";
        let config = build(
            Some(yaml),
            &[
                ("MEDTRIAGE__SECURITY__RATE_LIMIT_REQUESTS", "50"),
                ("MEDTRIAGE__SECURITY__ALLOWED_HOSTS", "a.example,b.example"),
                ("MEDTRIAGE__SECURITY__REQUIRE_API_KEY", "true"),
                ("MEDTRIAGE__SECURITY__API_KEYS", "k1,k2"),
            ],
        )
        .unwrap();

        assert_eq!(config.security.rate_limit_requests, 50);
        assert_eq!(config.security.allowed_hosts, vec!["a.example", "b.example"]);
        assert!(config.security.require_api_key);
        assert_eq!(config.security.api_keys, vec!["k1", "k2"]);
    }

    #[test]
    fn test_wildcards() {
        let config = build(
            None,
            &[
                ("MEDTRIAGE__SECURITY__ALLOWED_HOSTS", "*"),
                ("MEDTRIAGE__SECURITY__ALLOWED_ORIGINS", "*"),
            ],
        )
        .unwrap();

        assert!(config.security.allows_any_host());
        assert!(config.security.allows_any_origin());
    }

    #[test]
    fn test_validation_rejects_zero_limit() {
        let err = build(None, &[("MEDTRIAGE__SECURITY__RATE_LIMIT_REQUESTS", "0")]).unwrap_err();
        assert!(err.to_string().contains("rate_limit_requests"));
    }

    #[test]
    fn test_validation_rejects_inverted_lengths() {
        let yaml = "security:\n  min_text_length: 10\n  max_text_length: 5\n";
        assert!(build(Some(yaml), &[]).is_err());
    }

    #[test]
    fn test_validation_rejects_two_model_sources() {
        let yaml = "model:\n  model_dir: ./model\n  hf_repo: org/model\n";
        assert!(build(Some(yaml), &[]).is_err());
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let yaml = "model:\n  model_dir: ./model\n  hf_repo: org/model\n";
        let mut config = layered(Some(yaml), &[]).unwrap();
        assert!(config.validate().is_err());

        // what --model-dir does
        config.model.model_dir = Some(PathBuf::from("./other"));
        config.model.hf_repo = None;
        assert!(config.validate().is_ok());
    }
}
