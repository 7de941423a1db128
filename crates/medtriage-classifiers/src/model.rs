//! Model adapter: capability traits for an externally loaded scoring model

use async_trait::async_trait;
use medtriage_core::types::CATEGORY_COUNT;
use medtriage_core::{Category, ClassificationResult, Error, PredictionSource, Result};
use std::sync::Arc;

/// A loaded model that scores text against its own label set.
///
/// Implementations return one `(label, probability)` pair per output
/// class. Labels are checked against the category set by
/// [`adapt_scores`]; a model is never trusted to produce valid labels.
#[async_trait]
pub trait ScoringModel: Send + Sync {
    /// Score the given text
    async fn score(&self, text: &str) -> Result<Vec<(String, f32)>>;

    /// Model name or identifier, for logs and health reporting
    fn name(&self) -> &str;
}

/// Produces a [`ScoringModel`]; called from a blocking thread at startup
pub trait ModelLoader: Send + Sync {
    /// Load model, tokenizer, and label mapping, all or nothing
    fn load(&self) -> Result<Arc<dyn ScoringModel>>;

    /// Short description of where the model comes from
    fn describe(&self) -> String;
}

/// Loader used when no model source is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredLoader;

impl ModelLoader for UnconfiguredLoader {
    fn load(&self) -> Result<Arc<dyn ScoringModel>> {
        Err(Error::config("no model source configured"))
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

/// Convert raw model scores into a [`ClassificationResult`].
///
/// Fails when a label is outside the category set, when a category is
/// missing or repeated, or when the distribution breaks the result
/// invariants.
pub fn adapt_scores(scores: &[(String, f32)]) -> Result<ClassificationResult> {
    if scores.len() != CATEGORY_COUNT {
        return Err(Error::invalid_result(format!(
            "expected {} scores, model returned {}",
            CATEGORY_COUNT,
            scores.len()
        )));
    }

    let mut values = [f64::NAN; CATEGORY_COUNT];
    for (label, probability) in scores {
        let category: Category = label.parse()?;
        let slot = &mut values[category.index()];
        if !slot.is_nan() {
            return Err(Error::invalid_result(format!("duplicate label: {}", label)));
        }
        *slot = f64::from(*probability);
    }

    let result = ClassificationResult::from_distribution(values, PredictionSource::Model);
    result.validate()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(values: [f32; 5]) -> Vec<(String, f32)> {
        Category::ALL
            .iter()
            .zip(values)
            .map(|(c, p)| (c.as_str().to_string(), p))
            .collect()
    }

    #[test]
    fn test_adapt_valid_scores() {
        let result = adapt_scores(&scores([0.05, 0.7, 0.1, 0.1, 0.05])).unwrap();

        assert_eq!(result.predicted_class, Category::CardiovascularDiseases);
        assert!((result.confidence - 0.7).abs() < 1e-6);
        assert_eq!(result.source, PredictionSource::Model);
    }

    #[test]
    fn test_adapt_rejects_unknown_label() {
        let mut raw = scores([0.2; 5]);
        raw[0].0 = "Oncology".to_string();
        assert!(matches!(adapt_scores(&raw), Err(Error::UnknownCategory(_))));
    }

    #[test]
    fn test_adapt_rejects_duplicate_label() {
        let mut raw = scores([0.2; 5]);
        raw[1].0 = raw[0].0.clone();
        assert!(matches!(adapt_scores(&raw), Err(Error::InvalidResult(_))));
    }

    #[test]
    fn test_adapt_rejects_wrong_arity() {
        let raw = scores([0.2; 5])[..3].to_vec();
        assert!(adapt_scores(&raw).is_err());
    }

    #[test]
    fn test_unconfigured_loader_fails() {
        assert!(UnconfiguredLoader.load().is_err());
        assert_eq!(UnconfiguredLoader.describe(), "none");
    }
}
