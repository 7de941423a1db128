//! Keyword rule engine (deterministic fallback classifier)
//!
//! Rules are evaluated in a fixed order and the first rule with any
//! keyword hit wins. Confidence is a constant per rule, never derived
//! from how many keywords matched.

use aho_corasick::AhoCorasick;
use medtriage_core::{Category, ClassificationResult, Error, Result};

const CANCER_KEYWORDS: &[&str] = &[
    "cancer",
    "tumor",
    "malignant",
    "oncology",
    "chemotherapy",
    "radiation",
];

const CARDIOVASCULAR_KEYWORDS: &[&str] = &[
    "heart",
    "cardiac",
    "cardiovascular",
    "chest pain",
    "stroke",
    "blood pressure",
];

const METABOLIC_KEYWORDS: &[&str] = &[
    "diabetes",
    "insulin",
    "thyroid",
    "kidney",
    "metabolic",
    "endocrine",
    "blood sugar",
    "hormone",
];

const NEUROLOGICAL_KEYWORDS: &[&str] = &[
    "alzheimer",
    "dementia",
    "brain",
    "neurological",
    "cognitive",
    "memory",
    "parkinson",
    "tremor",
    "scan",
];

/// Category returned when no rule matches
pub const DEFAULT_CATEGORY: Category = Category::OtherAgeRelatedImmuneDisorders;

/// Confidence returned when no rule matches
pub const DEFAULT_CONFIDENCE: f64 = 0.60;

/// One entry of the ordered rule list
pub struct KeywordRule {
    category: Category,
    confidence: f64,
    keywords: &'static [&'static str],
    matcher: AhoCorasick,
}

impl KeywordRule {
    /// Build a rule from its keyword set
    pub fn new(
        category: Category,
        confidence: f64,
        keywords: &'static [&'static str],
    ) -> Result<Self> {
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(keywords)
            .map_err(|e| Error::classifier(format!("Failed to build keyword matcher: {}", e)))?;

        Ok(Self {
            category,
            confidence,
            keywords,
            matcher,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn keywords(&self) -> &[&'static str] {
        self.keywords
    }

    /// Whether any keyword occurs as a substring of the (lowercased) text
    fn matches(&self, lowered: &str) -> bool {
        self.matcher.is_match(lowered)
    }
}

/// Ordered first-match keyword classifier
pub struct KeywordClassifier {
    rules: Vec<KeywordRule>,
}

impl KeywordClassifier {
    /// Create the classifier with the built-in rule order:
    /// cancers, cardiovascular, metabolic, neurological.
    pub fn new() -> Result<Self> {
        Ok(Self {
            rules: vec![
                KeywordRule::new(Category::Cancers, 0.85, CANCER_KEYWORDS)?,
                KeywordRule::new(
                    Category::CardiovascularDiseases,
                    0.80,
                    CARDIOVASCULAR_KEYWORDS,
                )?,
                KeywordRule::new(
                    Category::MetabolicEndocrineDisorders,
                    0.80,
                    METABOLIC_KEYWORDS,
                )?,
                KeywordRule::new(
                    Category::NeurologicalCognitiveDisorders,
                    0.75,
                    NEUROLOGICAL_KEYWORDS,
                )?,
            ],
        })
    }

    /// Classify text into a category and its fixed confidence.
    ///
    /// Total: always returns a verdict, falling through to the default
    /// category when nothing matches.
    pub fn classify(&self, text: &str) -> (Category, f64) {
        let lowered = text.to_lowercase();

        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| (rule.category, rule.confidence))
            .unwrap_or((DEFAULT_CATEGORY, DEFAULT_CONFIDENCE))
    }

    /// Classify and synthesize the full probability distribution
    pub fn classify_result(&self, text: &str) -> ClassificationResult {
        let (category, confidence) = self.classify(text);
        ClassificationResult::from_rule(category, confidence)
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new().expect("Failed to create keyword classifier")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medtriage_core::types::PROBABILITY_TOLERANCE;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::default()
    }

    #[test]
    fn test_each_rule_fires_with_its_confidence() {
        let c = classifier();

        assert_eq!(c.classify("Is this tumor malignant?"), (Category::Cancers, 0.85));
        assert_eq!(
            c.classify("What causes chest pain after exercise?"),
            (Category::CardiovascularDiseases, 0.80)
        );
        assert_eq!(
            c.classify("What are the symptoms of diabetes?"),
            (Category::MetabolicEndocrineDisorders, 0.80)
        );
        assert_eq!(
            c.classify("How is Parkinson diagnosed?"),
            (Category::NeurologicalCognitiveDisorders, 0.75)
        );
    }

    #[test]
    fn test_no_match_defaults_to_other() {
        let c = classifier();
        assert_eq!(
            c.classify("How do I treat shingles?"),
            (Category::OtherAgeRelatedImmuneDisorders, 0.60)
        );
    }

    #[test]
    fn test_case_insensitive() {
        let c = classifier();
        assert_eq!(c.classify("DIABETES"), c.classify("diabetes"));
        assert_eq!(c.classify("Chemotherapy"), (Category::Cancers, 0.85));
    }

    #[test]
    fn test_first_match_wins() {
        let c = classifier();

        // cancer is checked before heart
        assert_eq!(
            c.classify("Can heart disease follow cancer treatment?"),
            (Category::Cancers, 0.85)
        );
        // cardiovascular is checked before metabolic
        assert_eq!(
            c.classify("Does diabetes raise blood pressure?"),
            (Category::CardiovascularDiseases, 0.80)
        );
        // metabolic is checked before neurological
        assert_eq!(
            c.classify("Can thyroid problems affect memory?"),
            (Category::MetabolicEndocrineDisorders, 0.80)
        );
    }

    #[test]
    fn test_substring_matching() {
        let c = classifier();
        // "scan" inside "scanning", "heart" inside "heartburn"
        assert_eq!(c.classify("scanning results").0, Category::NeurologicalCognitiveDisorders);
        assert_eq!(c.classify("heartburn at night").0, Category::CardiovascularDiseases);
    }

    #[test]
    fn test_result_distribution_invariants() {
        let c = classifier();
        let inputs = [
            "cancer",
            "stroke recovery",
            "insulin dosage",
            "dementia care",
            "dry mouth",
            "",
        ];

        for input in inputs {
            let result = c.classify_result(input);
            let sum = result.probabilities.sum();
            assert!((sum - 1.0).abs() <= PROBABILITY_TOLERANCE, "{input}: {sum}");
            assert_eq!(
                result.probabilities.get(result.predicted_class),
                result.probabilities.max()
            );
            assert_eq!(result.confidence, result.probabilities.get(result.predicted_class));
        }
    }

    #[test]
    fn test_rule_order_is_fixed() {
        let order: Vec<_> = classifier().rules().iter().map(|r| r.category()).collect();
        assert_eq!(
            order,
            vec![
                Category::Cancers,
                Category::CardiovascularDiseases,
                Category::MetabolicEndocrineDisorders,
                Category::NeurologicalCognitiveDisorders,
            ]
        );
    }
}
