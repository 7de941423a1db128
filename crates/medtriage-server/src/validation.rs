//! Validation of submitted prediction text
//!
//! Checks run in a fixed order and the first failure wins: presence,
//! emptiness, length bounds, injection patterns, special-character
//! density. Null bytes are removed before any check looks at the text,
//! and accepted text is returned trimmed.

use crate::config::SecurityConfig;
use regex::RegexSet;

/// Highest tolerated share of characters that are neither alphanumeric nor whitespace
pub const MAX_SPECIAL_CHAR_RATIO: f64 = 0.3;

/// Injection signatures, matched case-insensitively
const INJECTION_PATTERNS: &[(&str, &str)] = &[
    ("script_tag", r"<\s*script\b"),
    ("javascript_uri", r"javascript\s*:"),
    ("vbscript_uri", r"vbscript\s*:"),
    ("base64_data_uri", r"data:[^,]*base64"),
    ("event_handler", r"\bon\w+\s*="),
    ("css_expression", r"expression\s*\("),
    ("eval_call", r"eval\s*\("),
    ("sql_union_select", r"union\s+(all\s+)?select"),
    ("sql_drop_table", r"drop\s+table"),
    ("sql_insert_into", r"insert\s+into"),
    ("sql_delete_from", r"delete\s+from"),
];

/// Why a text was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Text input is required")]
    Missing,

    #[error("Text cannot be empty or only whitespace")]
    Empty,

    #[error("Text must be at least {0} characters long")]
    TooShort(usize),

    #[error("Text must be no more than {0} characters long")]
    TooLong(usize),

    #[error("Text contains potentially malicious content")]
    Malicious { pattern: &'static str },

    #[error("Text contains too many special characters")]
    TooManySpecialCharacters,
}

impl ValidationError {
    /// Label used for the rejected-input counter
    pub fn input_type(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Empty => "empty",
            Self::TooShort(_) => "too_short",
            Self::TooLong(_) => "too_long",
            Self::Malicious { .. } => "malicious_pattern",
            Self::TooManySpecialCharacters => "special_characters",
        }
    }

    /// Rejections that count as policy violations rather than caller mistakes
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Malicious { .. } | Self::TooManySpecialCharacters)
    }

    /// Missing or blank input is unprocessable; everything else is a bad request
    pub fn is_unprocessable(&self) -> bool {
        matches!(self, Self::Missing | Self::Empty)
    }
}

/// Validates and sanitizes prediction text
pub struct InputValidator {
    min_length: usize,
    max_length: usize,
    patterns: RegexSet,
}

impl InputValidator {
    pub fn new(min_length: usize, max_length: usize) -> Result<Self, regex::Error> {
        let patterns = RegexSet::new(
            INJECTION_PATTERNS
                .iter()
                .map(|(_, pattern)| format!("(?i){}", pattern)),
        )?;

        Ok(Self {
            min_length,
            max_length,
            patterns,
        })
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self, regex::Error> {
        Self::new(config.min_text_length, config.max_text_length)
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Validate `text` and return its sanitized form
    pub fn validate(&self, text: Option<&str>) -> Result<String, ValidationError> {
        let raw = text.ok_or(ValidationError::Missing)?;
        if raw.is_empty() {
            return Err(ValidationError::Empty);
        }

        let stripped: String = raw.chars().filter(|&c| c != '\0').collect();
        let trimmed = stripped.trim();
        let length = trimmed.chars().count();
        if length < self.min_length {
            return Err(if trimmed.is_empty() {
                ValidationError::Empty
            } else {
                ValidationError::TooShort(self.min_length)
            });
        }
        if length > self.max_length {
            return Err(ValidationError::TooLong(self.max_length));
        }

        if let Some(index) = self.patterns.matches(trimmed).into_iter().next() {
            return Err(ValidationError::Malicious {
                pattern: INJECTION_PATTERNS[index].0,
            });
        }

        if special_char_ratio(trimmed) > MAX_SPECIAL_CHAR_RATIO {
            return Err(ValidationError::TooManySpecialCharacters);
        }

        // reachable with a zero minimum length
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        Ok(trimmed.to_string())
    }
}

fn special_char_ratio(text: &str) -> f64 {
    let mut total = 0usize;
    let mut special = 0usize;
    for c in text.chars() {
        total += 1;
        if !c.is_alphanumeric() && !c.is_whitespace() {
            special += 1;
        }
    }

    if total == 0 {
        0.0
    } else {
        special as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::new(1, 5000).unwrap()
    }

    #[test]
    fn test_accepts_and_trims() {
        let v = validator();
        assert_eq!(
            v.validate(Some("  What are the symptoms of diabetes?  ")).unwrap(),
            "What are the symptoms of diabetes?"
        );
    }

    #[test]
    fn test_missing_and_empty() {
        let v = validator();
        assert_eq!(v.validate(None), Err(ValidationError::Missing));
        assert_eq!(v.validate(Some("")), Err(ValidationError::Empty));
        assert_eq!(v.validate(Some("   \n\t")), Err(ValidationError::Empty));
        assert!(ValidationError::Empty.is_unprocessable());
        assert!(!ValidationError::TooLong(1).is_unprocessable());
    }

    #[test]
    fn test_length_bounds_count_characters() {
        let v = validator();
        assert_eq!(
            v.validate(Some(&"a".repeat(5001))),
            Err(ValidationError::TooLong(5000))
        );
        assert!(v.validate(Some(&"a".repeat(5000))).is_ok());

        // 5000 two-byte characters are within bounds
        assert!(v.validate(Some(&"é".repeat(5000))).is_ok());

        let strict = InputValidator::new(10, 20).unwrap();
        assert_eq!(
            strict.validate(Some("  short  ")),
            Err(ValidationError::TooShort(10))
        );
    }

    #[test]
    fn test_injection_patterns() {
        let v = validator();
        for text in [
            "<script>alert(1)</script>",
            "<SCRIPT src=x>",
            "javascript:alert(1)",
            "JaVaScRiPt : void",
            "vbscript:msgbox",
            "data:text/html;base64,PHNjcmlwdD4=",
            "img onerror=alert(1)",
            "width: expression(alert(1))",
            "eval (payload)",
            "1 UNION SELECT password",
            "'; DROP TABLE users; --",
            "insert into patients values",
            "delete   from records",
        ] {
            assert!(
                matches!(v.validate(Some(text)), Err(ValidationError::Malicious { .. })),
                "expected rejection for {:?}",
                text
            );
        }
    }

    #[test]
    fn test_pattern_name_is_reported() {
        let v = validator();
        assert_eq!(
            v.validate(Some("please drop table now")),
            Err(ValidationError::Malicious {
                pattern: "sql_drop_table"
            })
        );
    }

    #[test]
    fn test_ordinary_medical_text_passes_patterns() {
        let v = validator();
        for text in [
            "Evaluation of cardiac function after a heart attack",
            "Once daily insulin dosing for type 2 diabetes",
            "Selected data on tumor growth",
            "Dropping blood pressure and dizziness",
        ] {
            assert!(v.validate(Some(text)).is_ok(), "rejected {:?}", text);
        }
    }

    #[test]
    fn test_special_character_density() {
        let v = validator();
        assert_eq!(
            v.validate(Some("!!!???...")),
            Err(ValidationError::TooManySpecialCharacters)
        );
        // 3 of 10 characters is exactly at the limit
        assert!(v.validate(Some("abcdefg!!!")).is_ok());
        assert!(v.validate(Some("abcdef!!!!")).is_err());
    }

    #[test]
    fn test_unicode_is_not_special() {
        let v = validator();
        assert!(v.validate(Some("Säure und Zucker – Diabète sucré")).is_ok());
        assert!(v.validate(Some("糖尿病の症状は何ですか")).is_ok());
        assert_eq!(
            v.validate(Some("  ¿Cuáles son los síntomas de la diabetes?")).unwrap(),
            "¿Cuáles son los síntomas de la diabetes?"
        );
    }

    #[test]
    fn test_null_bytes_are_stripped() {
        let v = validator();
        assert_eq!(v.validate(Some("dia\0betes")).unwrap(), "diabetes");
        assert_eq!(v.validate(Some("\0")), Err(ValidationError::Empty));
        assert_eq!(v.validate(Some(" \0 \0 ")), Err(ValidationError::Empty));
    }

    #[test]
    fn test_null_bytes_cannot_split_patterns() {
        let v = validator();
        assert_eq!(
            v.validate(Some("<scr\0ipt>alert(1)</scr\0ipt>")),
            Err(ValidationError::Malicious {
                pattern: "script_tag"
            })
        );
        assert_eq!(
            v.validate(Some("please dr\0op ta\0ble x")),
            Err(ValidationError::Malicious {
                pattern: "sql_drop_table"
            })
        );
        assert!(matches!(
            v.validate(Some("java\0script:void(0)")),
            Err(ValidationError::Malicious { .. })
        ));
    }

    #[test]
    fn test_violation_classification() {
        assert!(ValidationError::Malicious { pattern: "eval_call" }.is_security_violation());
        assert!(ValidationError::TooManySpecialCharacters.is_security_violation());
        assert!(!ValidationError::TooLong(10).is_security_violation());
        assert_eq!(ValidationError::Missing.input_type(), "missing");
    }
}
