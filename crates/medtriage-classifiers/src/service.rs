//! Classification service: load state plus model/rule dispatch
//!
//! The service starts [`ClassifierState::Unloaded`] and moves to
//! [`ClassifierState::Loaded`] only when the loader returns a complete
//! model. Failed loads are logged and leave the service on the keyword
//! rules. While loaded, a failing, panicking, or invalid model call falls
//! back to the rules for that call only.

use crate::model::{adapt_scores, ModelLoader, ScoringModel};
use crate::rules::KeywordClassifier;
use medtriage_core::{ClassificationResult, Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Errors `predict` reports to its caller instead of defaulting
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("Input text cannot be empty")]
    EmptyInput,
}

/// Current load state
#[derive(Clone, Default)]
pub enum ClassifierState {
    #[default]
    Unloaded,
    Loaded(Arc<dyn ScoringModel>),
}

impl ClassifierState {
    fn model(&self) -> Option<Arc<dyn ScoringModel>> {
        match self {
            Self::Loaded(model) => Some(model.clone()),
            Self::Unloaded => None,
        }
    }
}

impl std::fmt::Debug for ClassifierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => f.write_str("Unloaded"),
            Self::Loaded(model) => f.debug_tuple("Loaded").field(&model.name()).finish(),
        }
    }
}

/// Owns the classifier state and dispatches predictions
pub struct ClassificationService {
    loader: Arc<dyn ModelLoader>,
    rules: KeywordClassifier,
    state: RwLock<ClassifierState>,
    load_lock: tokio::sync::Mutex<()>,
}

impl ClassificationService {
    /// Create an unloaded service that will load through `loader`
    pub fn new(loader: Arc<dyn ModelLoader>) -> Result<Self> {
        Ok(Self {
            loader,
            rules: KeywordClassifier::new()?,
            state: RwLock::new(ClassifierState::Unloaded),
            load_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Create a service that is already loaded with `model`
    pub fn with_model(model: Arc<dyn ScoringModel>) -> Result<Self> {
        let service = Self::new(Arc::new(crate::model::UnconfiguredLoader))?;
        *service.state.write() = ClassifierState::Loaded(model);
        Ok(service)
    }

    /// Attempt to load the model.
    ///
    /// Never fails: the outcome is logged and reflected in
    /// [`is_loaded`](Self::is_loaded). Concurrent callers are serialized
    /// and a loaded service does not load again.
    pub async fn load(&self) -> bool {
        let _guard = self.load_lock.lock().await;
        if self.is_loaded() {
            return true;
        }

        let loader = self.loader.clone();
        let source = loader.describe();
        let start = Instant::now();

        let loaded = match tokio::task::spawn_blocking(move || loader.load()).await {
            Ok(Ok(model)) => {
                info!(
                    model = model.name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Model loaded"
                );
                *self.state.write() = ClassifierState::Loaded(model);
                true
            }
            Ok(Err(e)) => {
                warn!(
                    source = %source,
                    error = %e,
                    "Model unavailable, keyword rules will serve predictions"
                );
                false
            }
            Err(e) => {
                error!(source = %source, error = %e, "Model load task panicked");
                false
            }
        };

        metrics::gauge!("model_loaded_status").set(if loaded { 1.0 } else { 0.0 });
        loaded
    }

    /// Whether predictions are served by the model
    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.read(), ClassifierState::Loaded(_))
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ClassifierState {
        self.state.read().clone()
    }

    /// "model" or "rule_based"
    pub fn mode(&self) -> &'static str {
        if self.is_loaded() {
            "model"
        } else {
            "rule_based"
        }
    }

    /// Name of the loaded model, if any
    pub fn model_name(&self) -> Option<String> {
        self.state.read().model().map(|m| m.name().to_string())
    }

    /// The keyword rule engine
    pub fn rules(&self) -> &KeywordClassifier {
        &self.rules
    }

    /// Classify text.
    ///
    /// Only empty (after trimming) input is reported as an error; every
    /// other failure degrades to the keyword rules or, past that, to
    /// [`ClassificationResult::fallback_default`].
    pub async fn predict(
        &self,
        text: &str,
    ) -> std::result::Result<ClassificationResult, ClassifyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClassifyError::EmptyInput);
        }

        let model = self.state.read().model();
        let result = match model {
            Some(model) => self.predict_with_model(model, text).await,
            None => self.rules.classify_result(text),
        };

        match result.validate() {
            Ok(()) => Ok(result),
            Err(e) => {
                error!(error = %e, "Classification produced an invalid result, using default");
                metrics::counter!("classifier_fallbacks_total", "reason" => "invalid_result")
                    .increment(1);
                Ok(ClassificationResult::fallback_default())
            }
        }
    }

    async fn predict_with_model(
        &self,
        model: Arc<dyn ScoringModel>,
        text: &str,
    ) -> ClassificationResult {
        let scorer = model.clone();
        let input = text.to_string();
        let scored = tokio::spawn(async move { scorer.score(&input).await }).await;

        let (outcome, reason) = match scored {
            Ok(scores) => (scores.and_then(|scores| adapt_scores(&scores)), "model_error"),
            Err(e) => (
                Err(Error::model(format!("scoring task failed: {}", e))),
                "model_panic",
            ),
        };

        match outcome {
            Ok(result) => {
                debug!(model = model.name(), class = %result.predicted_class, "Model prediction");
                result
            }
            Err(e) => {
                warn!(
                    model = model.name(),
                    error = %e,
                    "Model prediction failed, using keyword rules for this request"
                );
                metrics::counter!("classifier_fallbacks_total", "reason" => reason).increment(1);
                self.rules.classify_result(text)
            }
        }
    }
}
