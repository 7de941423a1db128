//! Behavior of the classification service through its public API

use async_trait::async_trait;
use medtriage_classifiers::{
    ClassificationService, ClassifyError, KeywordClassifier, ModelLoader, ScoringModel,
    UnconfiguredLoader,
};
use medtriage_core::{Category, Error, PredictionSource, Result};
use std::sync::Arc;

const SAMPLES: &[&str] = &[
    "What are the early signs of breast cancer?",
    "Chemotherapy side effects",
    "Is chest pain after exercise normal?",
    "Blood pressure readings at home",
    "How does insulin resistance develop?",
    "Thyroid hormone levels",
    "Memory loss in older adults",
    "Parkinson tremor treatment",
    "Arthritis and joint stiffness",
    "Vaccination schedule for seniors",
    "x",
    "ÄÖÜ ß ça va? 心脏病",
];

/// Model that returns scores that do not form a valid distribution
struct SkewedModel;

#[async_trait]
impl ScoringModel for SkewedModel {
    async fn score(&self, _text: &str) -> Result<Vec<(String, f32)>> {
        Ok(Category::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), 0.9))
            .collect())
    }

    fn name(&self) -> &str {
        "skewed"
    }
}

struct BrokenLoader;

impl ModelLoader for BrokenLoader {
    fn load(&self) -> Result<Arc<dyn ScoringModel>> {
        Err(Error::model("checkpoint is missing model.safetensors"))
    }

    fn describe(&self) -> String {
        "broken".to_string()
    }
}

#[tokio::test]
async fn test_every_rule_result_is_valid() {
    let service = ClassificationService::new(Arc::new(UnconfiguredLoader)).unwrap();

    for text in SAMPLES {
        let result = service.predict(text).await.unwrap();
        assert!(result.validate().is_ok(), "invalid result for {:?}", text);
        assert_eq!(result.source, PredictionSource::Rules);
        assert_eq!(result.probabilities.argmax(), result.predicted_class);
    }
}

#[tokio::test]
async fn test_service_matches_keyword_classifier() {
    let service = ClassificationService::new(Arc::new(UnconfiguredLoader)).unwrap();
    let rules = KeywordClassifier::new().unwrap();

    for text in SAMPLES {
        let (category, confidence) = rules.classify(text);
        let result = service.predict(text).await.unwrap();
        assert_eq!(result.predicted_class, category);
        assert_eq!(result.confidence, confidence);
    }
}

#[tokio::test]
async fn test_invalid_model_distribution_never_leaks() {
    let service = ClassificationService::with_model(Arc::new(SkewedModel)).unwrap();

    let result = service.predict("cancer screening").await.unwrap();
    assert!(result.validate().is_ok());
    assert_eq!(result.predicted_class, Category::Cancers);
    assert_eq!(result.source, PredictionSource::Rules);
}

#[tokio::test]
async fn test_load_failure_keeps_serving() {
    let service = ClassificationService::new(Arc::new(BrokenLoader)).unwrap();

    assert!(!service.load().await);
    assert!(!service.load().await);
    assert_eq!(service.mode(), "rule_based");
    assert_eq!(service.model_name(), None);

    let result = service.predict("kidney function").await.unwrap();
    assert_eq!(result.predicted_class, Category::MetabolicEndocrineDisorders);
}

#[tokio::test]
async fn test_whitespace_only_input_is_rejected() {
    let service = ClassificationService::new(Arc::new(UnconfiguredLoader)).unwrap();

    for text in ["", " ", "\t\n", "\u{3000}"] {
        assert_eq!(service.predict(text).await, Err(ClassifyError::EmptyInput));
    }
}
