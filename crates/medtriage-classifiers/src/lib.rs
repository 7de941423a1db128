//! MedTriage Classifiers
//!
//! Classification of medical questions into the five focus groups.
//!
//! Two paths produce a [`ClassificationResult`](medtriage_core::ClassificationResult):
//! - A transformer-backed [`ScoringModel`] when one has been loaded
//! - The deterministic [`KeywordClassifier`] when it has not, or when a
//!   single model call fails
//!
//! [`ClassificationService`] owns the load state and chooses between them.

#[cfg(feature = "ml-models")]
pub mod bert;
pub mod model;
pub mod rules;
pub mod service;

#[cfg(feature = "ml-models")]
pub use bert::{BertModelConfig, BertModelLoader, BertScoringModel, DeviceType, ModelSource};
pub use model::{adapt_scores, ModelLoader, ScoringModel, UnconfiguredLoader};
pub use rules::{KeywordClassifier, KeywordRule};
pub use service::{ClassificationService, ClassifierState, ClassifyError};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::model::{ModelLoader, ScoringModel};
    pub use crate::rules::KeywordClassifier;
    pub use crate::service::{ClassificationService, ClassifyError};
}
