use serde_json::{json, Value};
use std::collections::HashMap;

use crate::core::types::{AnalysisResult, Preset, ValidationOutcome};

/// Alt text longer than this is cut off by many screen readers
pub const ALT_TEXT_RECOMMENDED_MAX: usize = 125;

/// Check metadata against preset bounds.
///
/// Only a missing metadata object, a blank title or a non-array `keywords`
/// field are errors; everything else is reported as a warning.
pub fn validate_metadata(metadata: Option<&Value>, preset: &Preset) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    let Some(obj) = metadata.and_then(Value::as_object) else {
        outcome.errors.push("Metadata is missing".to_string());
        return outcome;
    };

    let title = obj.get("title").and_then(Value::as_str).map(str::trim).unwrap_or("");
    if title.is_empty() {
        outcome.errors.push("Title is required".to_string());
    } else {
        let len = title.chars().count();
        let max = preset.title_max_length();
        if len > max {
            outcome
                .warnings
                .push(format!("Title is {} characters, exceeds the {} character limit", len, max));
        }
    }

    let alt_text = obj.get("alt_text").and_then(Value::as_str).map(str::trim).unwrap_or("");
    if alt_text.is_empty() {
        outcome.warnings.push("Alt text is missing".to_string());
    } else {
        let len = alt_text.chars().count();
        if len > ALT_TEXT_RECOMMENDED_MAX {
            outcome.warnings.push(format!(
                "Alt text is {} characters, longer than the recommended {}",
                len, ALT_TEXT_RECOMMENDED_MAX
            ));
        }
    }

    match obj.get("keywords").and_then(Value::as_array) {
        None => outcome.errors.push("Keywords must be an array".to_string()),
        Some(items) => {
            let keywords: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            let (min, max) = (preset.keywords_min(), preset.keywords_max());

            if keywords.len() < min {
                outcome.warnings.push(format!(
                    "Too few keywords: {} (minimum {})",
                    keywords.len(),
                    min
                ));
            } else if keywords.len() > max {
                outcome.warnings.push(format!(
                    "Too many keywords: {} (maximum {})",
                    keywords.len(),
                    max
                ));
            }

            let duplicates = case_insensitive_duplicates(&keywords);
            if !duplicates.is_empty() {
                outcome
                    .warnings
                    .push(format!("Duplicate keywords: {}", duplicates.join(", ")));
            }
        }
    }

    outcome.is_valid = outcome.errors.is_empty();
    outcome
}

/// `validate_metadata` for an already-normalized result
pub fn validate_result(result: &AnalysisResult, preset: &Preset) -> ValidationOutcome {
    let metadata = json!({
        "alt_text": result.alt_text,
        "title": result.title,
        "keywords": result.keywords,
    });
    validate_metadata(Some(&metadata), preset)
}

/// Lower-cased keywords seen more than once, in first-repeat order
fn case_insensitive_duplicates(keywords: &[&str]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut duplicates = Vec::new();
    for keyword in keywords {
        let key = keyword.trim().to_lowercase();
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            duplicates.push(key);
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_keywords(n: usize) -> AnalysisResult {
        AnalysisResult {
            alt_text: "A red car on a street".to_string(),
            title: "Red car in urban setting".to_string(),
            keywords: (0..n).map(|i| format!("keyword{}", i)).collect(),
        }
    }

    #[test]
    fn test_too_few_keywords_is_a_warning() {
        let preset = Preset {
            keywords_min: Some(15),
            keywords_max: Some(25),
            ..Preset::default()
        };
        let outcome = validate_result(&result_with_keywords(6), &preset);

        assert!(outcome.is_valid);
        assert!(outcome.errors.is_empty());
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.to_lowercase().contains("too few keywords")));
    }

    #[test]
    fn test_in_range_result_is_clean() {
        let outcome = validate_result(&result_with_keywords(20), &Preset::default());
        assert!(outcome.is_valid);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_too_many_keywords() {
        let preset = Preset { keywords_max: Some(10), keywords_min: Some(1), ..Preset::default() };
        let outcome = validate_result(&result_with_keywords(12), &preset);
        assert!(outcome.warnings.iter().any(|w| w.starts_with("Too many keywords")));
    }

    #[test]
    fn test_title_over_preset_limit_warns() {
        let preset = Preset { title_max_length: Some(10), ..Preset::default() };
        let mut result = result_with_keywords(20);
        result.title = "A title longer than ten".to_string();

        let outcome = validate_result(&result, &preset);
        assert!(outcome.is_valid);
        assert!(outcome.warnings.iter().any(|w| w.starts_with("Title is 23 characters")));
    }

    #[test]
    fn test_long_alt_text_warns() {
        let mut result = result_with_keywords(20);
        result.alt_text = "x".repeat(126);
        let outcome = validate_result(&result, &Preset::default());
        assert!(outcome.warnings.iter().any(|w| w.contains("recommended 125")));
    }

    #[test]
    fn test_case_insensitive_duplicates_warn() {
        let mut result = result_with_keywords(18);
        result.keywords.push("Sunset".to_string());
        result.keywords.push("sunset".to_string());

        let outcome = validate_result(&result, &Preset::default());
        assert!(outcome.is_valid);
        assert!(outcome.warnings.contains(&"Duplicate keywords: sunset".to_string()));
    }

    #[test]
    fn test_missing_metadata_is_an_error() {
        let outcome = validate_metadata(None, &Preset::default());
        assert!(!outcome.is_valid);
        assert_eq!(outcome.errors, vec!["Metadata is missing".to_string()]);
    }

    #[test]
    fn test_blank_title_and_non_array_keywords_are_errors() {
        let metadata = json!({"title": "   ", "alt_text": "", "keywords": "a, b, c"});
        let outcome = validate_metadata(Some(&metadata), &Preset::default());

        assert!(!outcome.is_valid);
        assert!(outcome.errors.contains(&"Title is required".to_string()));
        assert!(outcome.errors.contains(&"Keywords must be an array".to_string()));
        assert!(outcome.warnings.contains(&"Alt text is missing".to_string()));
    }
}
