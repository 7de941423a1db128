//! Shared application state

use anyhow::{Context, Result};
use medtriage_classifiers::{ClassificationService, ModelLoader, UnconfiguredLoader};
use medtriage_telemetry::{PredictionLog, SecurityMonitor};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ModelSettings, ServiceConfig};
use crate::rate_limit::SlidingWindowLimiter;
use crate::security::{ApiKeyPolicy, TrustedHosts, UrlScanner};
use crate::validation::InputValidator;

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<ServiceConfig>,

    /// Model/rules dispatch
    pub classifier: Arc<ClassificationService>,

    pub validator: Arc<InputValidator>,

    pub limiter: Arc<SlidingWindowLimiter>,

    pub url_scanner: Arc<UrlScanner>,

    pub trusted_hosts: Arc<TrustedHosts>,

    pub api_keys: Arc<ApiKeyPolicy>,

    /// Security event log and counters
    pub security: SecurityMonitor,

    /// Optional prediction log
    pub prediction_log: Option<Arc<PredictionLog>>,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Build state around an existing classification service
    pub fn new(
        config: ServiceConfig,
        classifier: Arc<ClassificationService>,
        metrics_handle: PrometheusHandle,
    ) -> Result<Self> {
        let security = &config.security;

        let validator = InputValidator::from_config(security).context("building input validator")?;
        let url_scanner = UrlScanner::new().context("building URL scanner")?;
        let limiter = SlidingWindowLimiter::new(
            security.rate_limit_requests,
            security.rate_limit_window(),
            security.max_tracked_clients,
        );

        let prediction_log = if config.prediction_log.enabled {
            match PredictionLog::open(&config.prediction_log.path) {
                Ok(log) => {
                    info!(path = %log.path().display(), "Recording predictions");
                    Some(Arc::new(log))
                }
                Err(e) => {
                    warn!(
                        path = %config.prediction_log.path.display(),
                        error = %e,
                        "Prediction log unavailable, predictions will not be recorded"
                    );
                    None
                }
            }
        } else {
            None
        };

        info!(
            rate_limit = security.rate_limit_requests,
            window_secs = security.rate_limit_window_secs,
            api_key_required = security.require_api_key,
            "Security policy configured"
        );

        Ok(Self {
            trusted_hosts: Arc::new(TrustedHosts::from_config(security)),
            api_keys: Arc::new(ApiKeyPolicy::from_config(security)),
            security: SecurityMonitor::new(security.audit_capacity),
            validator: Arc::new(validator),
            url_scanner: Arc::new(url_scanner),
            limiter: Arc::new(limiter),
            classifier,
            prediction_log,
            metrics_handle,
            config: Arc::new(config),
        })
    }

    /// Build state with a classification service for the configured model
    pub fn from_config(config: ServiceConfig, metrics_handle: PrometheusHandle) -> Result<Self> {
        let loader = model_loader(&config.model)?;
        info!("Model source: {}", loader.describe());

        let classifier = Arc::new(ClassificationService::new(loader)?);
        Self::new(config, classifier, metrics_handle)
    }

    /// Whether the prediction log exists and its last write succeeded
    pub fn storage_connected(&self) -> bool {
        self.prediction_log
            .as_ref()
            .map(|log| log.is_connected())
            .unwrap_or(false)
    }
}

/// Pick the loader for the configured model source
#[cfg(feature = "ml-models")]
pub fn model_loader(settings: &ModelSettings) -> Result<Arc<dyn ModelLoader>> {
    use medtriage_classifiers::{BertModelConfig, BertModelLoader, DeviceType};

    let config = match (&settings.model_dir, &settings.hf_repo) {
        (Some(dir), _) => BertModelConfig::from_local(dir),
        (None, Some(repo)) => BertModelConfig::from_hf(repo, settings.revision.clone()),
        (None, None) => return Ok(Arc::new(UnconfiguredLoader)),
    };

    let device = DeviceType::parse(&settings.device)?;
    let mut config = config
        .with_device(device)
        .with_max_sequence_length(settings.max_sequence_length);
    if let Some(mapping) = &settings.label_mapping {
        config = config.with_label_mapping(mapping);
    }

    Ok(Arc::new(BertModelLoader::new(config)))
}

#[cfg(not(feature = "ml-models"))]
pub fn model_loader(settings: &ModelSettings) -> Result<Arc<dyn ModelLoader>> {
    if settings.is_configured() {
        warn!("Built without ml-models support; the configured model will not be loaded");
    }
    Ok(Arc::new(UnconfiguredLoader))
}
