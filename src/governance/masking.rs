//! Sensitive field masking
//!
//! Every result leaving the gateway passes through here. Field names are
//! matched against the configured pattern set (case-insensitive substring, or
//! regex for `/slash-wrapped/` entries) at every nesting depth, through
//! objects and arrays. Matching values are replaced according to the
//! configured strategy; originals never leave the process.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::config::{MaskStrategy, MaskingConfig};
use crate::error::GatewayError;

/// Fixed replacement for fully masked values.
pub const MASK_PLACEHOLDER: &str = "***";

enum PatternMatcher {
    Substring(String),
    Pattern(Regex),
}

/// Compiled masking rules.
pub struct FieldMasker {
    matchers: Vec<PatternMatcher>,
    strategy: MaskStrategy,
    keep_chars: usize,
}

impl FieldMasker {
    pub fn new(config: &MaskingConfig) -> Result<Self, GatewayError> {
        let mut matchers = Vec::with_capacity(config.patterns.len());
        for pattern in &config.patterns {
            if let Some(expr) = pattern
                .strip_prefix('/')
                .and_then(|rest| rest.strip_suffix('/'))
            {
                let compiled = RegexBuilder::new(expr)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        GatewayError::Config(format!("invalid masking pattern '{}': {}", pattern, e))
                    })?;
                matchers.push(PatternMatcher::Pattern(compiled));
            } else {
                matchers.push(PatternMatcher::Substring(pattern.to_lowercase()));
            }
        }
        Ok(Self {
            matchers,
            strategy: config.strategy,
            keep_chars: config.keep_chars,
        })
    }

    /// Whether a field name counts as sensitive.
    pub fn field_is_sensitive(&self, field: &str) -> bool {
        let lowered = field.to_lowercase();
        self.matchers.iter().any(|matcher| match matcher {
            PatternMatcher::Substring(needle) => lowered.contains(needle),
            PatternMatcher::Pattern(regex) => regex.is_match(field),
        })
    }

    /// Mask sensitive fields in place across a result set. Returns whether
    /// anything was replaced.
    pub fn mask_documents(&self, documents: &mut [Value]) -> bool {
        let mut masked = false;
        for document in documents {
            masked |= self.mask_in_place(document);
        }
        masked
    }

    fn mask_in_place(&self, value: &mut Value) -> bool {
        match value {
            Value::Object(map) => {
                let mut masked = false;
                for (key, nested) in map.iter_mut() {
                    if self.field_is_sensitive(key) {
                        *nested = self.replacement(nested);
                        masked = true;
                    } else {
                        masked |= self.mask_in_place(nested);
                    }
                }
                masked
            }
            Value::Array(items) => {
                let mut masked = false;
                for item in items.iter_mut() {
                    masked |= self.mask_in_place(item);
                }
                masked
            }
            _ => false,
        }
    }

    /// Replacement for one sensitive value. Non-strings always collapse to
    /// the placeholder; strings follow the configured strategy.
    pub fn replacement(&self, value: &Value) -> Value {
        let text = match value.as_str() {
            Some(text) => text,
            None => return Value::String(MASK_PLACEHOLDER.to_string()),
        };
        match self.strategy {
            MaskStrategy::Full => Value::String(MASK_PLACEHOLDER.to_string()),
            MaskStrategy::Partial => {
                let chars: Vec<char> = text.chars().collect();
                // Too short to keep anything without leaking most of it.
                if chars.len() <= self.keep_chars * 2 {
                    return Value::String(MASK_PLACEHOLDER.to_string());
                }
                let head: String = chars[..self.keep_chars].iter().collect();
                let tail: String = chars[chars.len() - self.keep_chars..].iter().collect();
                Value::String(format!("{}{}{}", head, MASK_PLACEHOLDER, tail))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn masker(strategy: MaskStrategy) -> FieldMasker {
        let config = MaskingConfig {
            strategy,
            ..MaskingConfig::default()
        };
        FieldMasker::new(&config).unwrap()
    }

    #[test]
    fn substring_match_is_case_insensitive() {
        let masker = masker(MaskStrategy::Partial);
        assert!(masker.field_is_sensitive("email"));
        assert!(masker.field_is_sensitive("userEmail"));
        assert!(masker.field_is_sensitive("API_TOKEN"));
        assert!(!masker.field_is_sensitive("name"));
    }

    #[test]
    fn regex_patterns_use_slash_wrapping() {
        let config = MaskingConfig {
            patterns: vec!["/^pw_/".to_string()],
            ..MaskingConfig::default()
        };
        let masker = FieldMasker::new(&config).unwrap();
        assert!(masker.field_is_sensitive("pw_reset"));
        assert!(masker.field_is_sensitive("PW_reset"));
        assert!(!masker.field_is_sensitive("group_pw_reset"));
    }

    #[test]
    fn invalid_regex_pattern_is_a_config_error() {
        let config = MaskingConfig {
            patterns: vec!["/((/".to_string()],
            ..MaskingConfig::default()
        };
        assert!(FieldMasker::new(&config).is_err());
    }

    #[test]
    fn partial_keeps_ends_and_masks_the_middle() {
        let masker = masker(MaskStrategy::Partial);
        let mut docs = vec![json!({"email": "ana@example.com", "name": "ana"})];
        assert!(masker.mask_documents(&mut docs));
        let masked = docs[0]["email"].as_str().unwrap();
        assert_eq!(masked, "an***om");
        assert_eq!(docs[0]["name"], "ana");
    }

    #[test]
    fn short_values_collapse_entirely_under_partial() {
        let masker = masker(MaskStrategy::Partial);
        let mut docs = vec![json!({"token": "abcd"})];
        masker.mask_documents(&mut docs);
        assert_eq!(docs[0]["token"], MASK_PLACEHOLDER);
    }

    #[test]
    fn full_strategy_is_indistinguishable_across_values() {
        let masker = masker(MaskStrategy::Full);
        let mut docs = vec![
            json!({"email": "ana@example.com"}),
            json!({"email": "bo@other.org"}),
        ];
        masker.mask_documents(&mut docs);
        assert_eq!(docs[0]["email"], docs[1]["email"]);
        assert_eq!(docs[0]["email"], MASK_PLACEHOLDER);
    }

    #[test]
    fn nested_objects_and_arrays_are_walked() {
        let masker = masker(MaskStrategy::Full);
        let mut docs = vec![json!({
            "profile": {"contact": {"phone": "+351912345678"}},
            "sessions": [{"token": "tok-1"}, {"token": "tok-2"}]
        })];
        assert!(masker.mask_documents(&mut docs));
        assert_eq!(docs[0]["profile"]["contact"]["phone"], MASK_PLACEHOLDER);
        assert_eq!(docs[0]["sessions"][0]["token"], MASK_PLACEHOLDER);
        assert_eq!(docs[0]["sessions"][1]["token"], MASK_PLACEHOLDER);
    }

    #[test]
    fn non_string_sensitive_values_collapse_to_placeholder() {
        let masker = masker(MaskStrategy::Partial);
        let mut docs = vec![json!({"credit_card": 4111111111111111u64})];
        masker.mask_documents(&mut docs);
        assert_eq!(docs[0]["credit_card"], MASK_PLACEHOLDER);
    }

    #[test]
    fn nothing_matching_means_no_mask_flag() {
        let masker = masker(MaskStrategy::Partial);
        let mut docs = vec![json!({"name": "ana", "city": "lisbon"})];
        assert!(!masker.mask_documents(&mut docs));
        assert_eq!(docs[0], json!({"name": "ana", "city": "lisbon"}));
    }
}
