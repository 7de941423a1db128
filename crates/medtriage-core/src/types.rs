//! Category set and classification result types

use crate::error::{Error, Result};
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;
use std::str::FromStr;

/// Allowed deviation of a distribution's sum from 1.0
pub const PROBABILITY_TOLERANCE: f64 = 0.01;

/// Number of labels in the category set
pub const CATEGORY_COUNT: usize = 5;

/// The fixed set of medical focus groups.
///
/// Declaration order is the canonical order used for distributions and
/// for tie-breaking between equally likely labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Cancers,
    CardiovascularDiseases,
    MetabolicEndocrineDisorders,
    NeurologicalCognitiveDisorders,
    OtherAgeRelatedImmuneDisorders,
}

impl Category {
    /// All categories in canonical order
    pub const ALL: [Category; CATEGORY_COUNT] = [
        Category::Cancers,
        Category::CardiovascularDiseases,
        Category::MetabolicEndocrineDisorders,
        Category::NeurologicalCognitiveDisorders,
        Category::OtherAgeRelatedImmuneDisorders,
    ];

    /// Human-readable label, as exposed over the API
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancers => "Cancers",
            Self::CardiovascularDiseases => "Cardiovascular Diseases",
            Self::MetabolicEndocrineDisorders => "Metabolic & Endocrine Disorders",
            Self::NeurologicalCognitiveDisorders => "Neurological & Cognitive Disorders",
            Self::OtherAgeRelatedImmuneDisorders => "Other Age-Related & Immune Disorders",
        }
    }

    /// Position of this category in [`Category::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::UnknownCategory(s.to_string()))
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(de::Error::custom)
    }
}

/// Which path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionSource {
    /// The transformer-backed scoring model
    Model,
    /// The keyword rule engine
    Rules,
    /// The guaranteed default after an internal failure
    Default,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Rules => "rules",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A probability for every category, indexed by [`Category::index`].
///
/// Serializes as a JSON object ordered by descending probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probabilities([f64; CATEGORY_COUNT]);

impl Probabilities {
    pub fn new(values: [f64; CATEGORY_COUNT]) -> Self {
        Self(values)
    }

    /// Probability assigned to one category
    pub fn get(&self, category: Category) -> f64 {
        self.0[category.index()]
    }

    /// Sum of all values
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Largest value in the distribution
    pub fn max(&self) -> f64 {
        self.0.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Most likely category; ties go to the earlier category
    pub fn argmax(&self) -> Category {
        let mut best = Category::ALL[0];
        for category in Category::ALL {
            if self.get(category) > self.get(best) {
                best = category;
            }
        }
        best
    }

    /// Entries sorted by descending probability (stable on ties)
    pub fn ranked(&self) -> Vec<(Category, f64)> {
        let mut entries: Vec<_> = Category::ALL.iter().map(|c| (*c, self.get(*c))).collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries
    }
}

impl Serialize for Probabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let ranked = self.ranked();
        let mut map = serializer.serialize_map(Some(ranked.len()))?;
        for (category, probability) in ranked {
            map.serialize_entry(category.as_str(), &probability)?;
        }
        map.end()
    }
}

/// Output of every classification path
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ClassificationResult {
    /// Winning category
    pub predicted_class: Category,

    /// Confidence score (0.0-1.0)
    pub confidence: f64,

    /// Full distribution over the category set
    pub probabilities: Probabilities,

    /// Path that produced this result
    #[serde(skip)]
    pub source: PredictionSource,
}

impl ClassificationResult {
    /// Confidence reported by the guaranteed default result
    pub const DEFAULT_CONFIDENCE: f64 = 0.1;

    /// Shape a rule-engine verdict into a full distribution.
    ///
    /// The winner receives `confidence`; the remaining mass is split
    /// equally among the other four categories.
    pub fn from_rule(category: Category, confidence: f64) -> Self {
        let share = (1.0 - confidence) / (CATEGORY_COUNT - 1) as f64;
        let mut values = [share; CATEGORY_COUNT];
        values[category.index()] = confidence;

        Self {
            predicted_class: category,
            confidence,
            probabilities: Probabilities(values),
            source: PredictionSource::Rules,
        }
    }

    /// Build a result from a model distribution; the argmax wins
    pub fn from_distribution(values: [f64; CATEGORY_COUNT], source: PredictionSource) -> Self {
        let probabilities = Probabilities(values);
        let predicted_class = probabilities.argmax();

        Self {
            predicted_class,
            confidence: probabilities.get(predicted_class),
            probabilities,
            source,
        }
    }

    /// The result returned when every other path has failed
    pub fn fallback_default() -> Self {
        Self {
            predicted_class: Category::OtherAgeRelatedImmuneDisorders,
            confidence: Self::DEFAULT_CONFIDENCE,
            probabilities: Probabilities([1.0 / CATEGORY_COUNT as f64; CATEGORY_COUNT]),
            source: PredictionSource::Default,
        }
    }

    /// Check the distribution invariants.
    ///
    /// Every value lies in [0, 1], the values sum to 1.0 within
    /// [`PROBABILITY_TOLERANCE`], and the predicted class holds the maximum.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::invalid_result(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }

        for (category, probability) in self.probabilities.ranked() {
            if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
                return Err(Error::invalid_result(format!(
                    "probability {} for {} outside [0, 1]",
                    probability, category
                )));
            }
        }

        let sum = self.probabilities.sum();
        if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(Error::invalid_result(format!(
                "probabilities sum to {}",
                sum
            )));
        }

        if self.probabilities.get(self.predicted_class) < self.probabilities.max() {
            return Err(Error::invalid_result(format!(
                "{} is not the most likely category",
                self.predicted_class
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_from_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("Cancer".parse::<Category>().is_err());
    }

    #[test]
    fn test_rule_distribution_splits_remainder_equally() {
        let result = ClassificationResult::from_rule(Category::Cancers, 0.85);

        assert_eq!(result.probabilities.get(Category::Cancers), 0.85);
        for category in &Category::ALL[1..] {
            assert!((result.probabilities.get(*category) - 0.0375).abs() < 1e-9);
        }
        assert!((result.probabilities.sum() - 1.0).abs() < PROBABILITY_TOLERANCE);
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_default_result_is_uniform() {
        let result = ClassificationResult::fallback_default();

        assert_eq!(result.predicted_class, Category::OtherAgeRelatedImmuneDisorders);
        assert_eq!(result.confidence, 0.1);
        assert_eq!(result.source, PredictionSource::Default);
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_distribution_picks_argmax() {
        let result = ClassificationResult::from_distribution(
            [0.1, 0.05, 0.6, 0.15, 0.1],
            PredictionSource::Model,
        );

        assert_eq!(result.predicted_class, Category::MetabolicEndocrineDisorders);
        assert_eq!(result.confidence, 0.6);
    }

    #[test]
    fn test_validate_rejects_bad_sum() {
        let result = ClassificationResult::from_distribution(
            [0.5, 0.5, 0.5, 0.0, 0.0],
            PredictionSource::Model,
        );
        assert!(matches!(result.validate(), Err(Error::InvalidResult(_))));
    }

    #[test]
    fn test_probabilities_serialize_in_descending_order() {
        let result =
            ClassificationResult::from_rule(Category::NeurologicalCognitiveDisorders, 0.75);
        let json = serde_json::to_string(&result).unwrap();

        assert!(json.starts_with(concat!(
            r#"{"predicted_class":"Neurological & Cognitive Disorders","confidence":0.75,"#,
            r#""probabilities":{"Neurological & Cognitive Disorders":0.75"#
        )));
        assert!(!json.contains("source"));
    }
}
