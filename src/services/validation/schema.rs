// Metadata schema validation with best-effort repair
//
// Vision models routinely return almost-right JSON: a field under the wrong
// name, too few keywords, a two-word title. Strict validation runs first; when
// it fails the payload is repaired instead of rejected. Preset validation later
// reports anything still off as warnings.

use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::AnalysisResult;

pub const ALT_TEXT_MIN_CHARS: usize = 5;
pub const ALT_TEXT_MAX_CHARS: usize = 160;
pub const TITLE_MIN_CHARS: usize = 5;
pub const TITLE_STORED_MAX_CHARS: usize = 70;
pub const KEYWORDS_MIN: usize = 5;
pub const KEYWORDS_MAX: usize = 50;
pub const KEYWORDS_STORED_MAX: usize = 25;

/// Padding used when the model produced too few keywords
pub const FALLBACK_KEYWORDS: [&str; 5] = ["image", "photo", "visual", "content", "media"];

const ALT_TEXT_PLACEHOLDER: &str = "High-quality image";
const TITLE_PLACEHOLDER: &str = "Professional image";
const ALT_TEXT_QUALIFIER: &str = "Image of";
const TITLE_QUALIFIER: &str = "Photo:";

/// Produce an `AnalysisResult` from any decoded model payload.
///
/// Never fails: payloads that violate the schema go through the repair path.
pub fn normalize_analysis(value: &Value) -> AnalysisResult {
    match validate_strict(value) {
        Ok(result) => post_process(result),
        Err(violations) => {
            warn!("Model output failed schema validation, repairing: {}", violations.join("; "));
            repair(value)
        }
    }
}

/// Strict schema check. Returns every violation found.
pub fn validate_strict(value: &Value) -> Result<AnalysisResult, Vec<String>> {
    let Some(obj) = value.as_object() else {
        return Err(vec!["payload is not a JSON object".to_string()]);
    };

    let mut violations = Vec::new();

    let alt_text = match obj.get("alt_text").and_then(Value::as_str).map(str::trim) {
        Some(alt) => {
            let len = alt.chars().count();
            if !(ALT_TEXT_MIN_CHARS..=ALT_TEXT_MAX_CHARS).contains(&len) {
                violations.push(format!(
                    "alt_text must be {}-{} characters, got {}",
                    ALT_TEXT_MIN_CHARS, ALT_TEXT_MAX_CHARS, len
                ));
            }
            alt.to_string()
        }
        None => {
            violations.push("alt_text must be a string".to_string());
            String::new()
        }
    };

    let title = match obj.get("title").and_then(Value::as_str).map(str::trim) {
        Some(title) => {
            let len = title.chars().count();
            if len < TITLE_MIN_CHARS {
                violations.push(format!(
                    "title must be at least {} characters, got {}",
                    TITLE_MIN_CHARS, len
                ));
            }
            title.to_string()
        }
        None => {
            violations.push("title must be a string".to_string());
            String::new()
        }
    };

    let keywords = match obj.get("keywords").and_then(Value::as_array) {
        Some(items) => {
            let strings: Vec<String> = items
                .iter()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect();
            if strings.len() != items.len() {
                violations.push("keywords must contain only strings".to_string());
            }
            if !(KEYWORDS_MIN..=KEYWORDS_MAX).contains(&items.len()) {
                violations.push(format!(
                    "keywords must have {}-{} entries, got {}",
                    KEYWORDS_MIN,
                    KEYWORDS_MAX,
                    items.len()
                ));
            }
            strings
        }
        None => {
            violations.push("keywords must be an array".to_string());
            Vec::new()
        }
    };

    if violations.is_empty() {
        Ok(AnalysisResult { alt_text, title, keywords })
    } else {
        Err(violations)
    }
}

/// Normalization applied to schema-valid output
fn post_process(result: AnalysisResult) -> AnalysisResult {
    // Whitespace at the cut point can shrink a valid title below the floor
    let title = ensure_min_chars(
        truncate_chars(&result.title, TITLE_STORED_MAX_CHARS),
        TITLE_MIN_CHARS,
        TITLE_QUALIFIER,
    );
    let mut keywords = dedupe_keywords(result.keywords);

    if keywords.len() < KEYWORDS_MIN {
        // Duplicates collapsed the list below the schema floor
        keywords.extend(FALLBACK_KEYWORDS.iter().map(|k| k.to_string()));
        keywords = dedupe_keywords(keywords);
    }
    keywords.truncate(KEYWORDS_STORED_MAX);

    AnalysisResult {
        alt_text: result.alt_text,
        title,
        keywords,
    }
}

/// Best-effort reconstruction of a usable result from malformed output
pub fn repair(value: &Value) -> AnalysisResult {
    let alt_text = first_string(value, &["alt_text", "description"])
        .unwrap_or_else(|| ALT_TEXT_PLACEHOLDER.to_string());
    let alt_text = ensure_min_chars(
        truncate_chars(&alt_text, ALT_TEXT_MAX_CHARS),
        ALT_TEXT_MIN_CHARS,
        ALT_TEXT_QUALIFIER,
    );

    let title = first_string(value, &["title", "caption"])
        .unwrap_or_else(|| TITLE_PLACEHOLDER.to_string());
    let title = ensure_min_chars(
        truncate_chars(&title, TITLE_STORED_MAX_CHARS),
        TITLE_MIN_CHARS,
        TITLE_QUALIFIER,
    );

    let mut keywords: Vec<String> = value
        .get("keywords")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if keywords.len() < KEYWORDS_MIN {
        keywords.extend(FALLBACK_KEYWORDS.iter().map(|k| k.to_string()));
    }
    let mut keywords = dedupe_keywords(keywords);
    if keywords.len() < KEYWORDS_MIN {
        keywords = FALLBACK_KEYWORDS.iter().map(|k| k.to_string()).collect();
    }
    keywords.truncate(KEYWORDS_STORED_MAX);

    debug!(
        "Repaired metadata: title={:?}, {} keywords",
        title,
        keywords.len()
    );

    AnalysisResult { alt_text, title, keywords }
}

/// Trimmed, non-empty, first-seen order, case-sensitive
pub fn dedupe_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

/// Cut to `max` characters and drop trailing whitespace
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.trim_end().to_string();
    }
    s.chars().take(max).collect::<String>().trim_end().to_string()
}

fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn ensure_min_chars(s: String, min: usize, qualifier: &str) -> String {
    if s.chars().count() >= min {
        s
    } else {
        format!("{} {}", qualifier, s)
    }
}
