//! Sensitive-data redaction.
//!
//! Scans string values of a candidate response for sensitive patterns and
//! replaces matches with masking markers. Redaction is irreversible and
//! idempotent: markers contain no digits, so re-running redaction over an
//! already-redacted response changes nothing.

use regex::Regex;
use serde_json::Value;

/// A named sensitive-data pattern
struct SensitivePattern {
    name: &'static str,
    regex: Regex,
}

/// Applies masking markers to sensitive substrings
pub struct Redactor {
    patterns: Vec<SensitivePattern>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Redactor {
    /// Build the standard pattern set: payment cards, government IDs,
    /// health identifiers, personal contact data.
    pub fn new() -> Self {
        // Card first: a card number must not be partially consumed by the
        // narrower phone/SSN patterns.
        let specs: [(&'static str, &str); 5] = [
            ("card", r"\b(?:\d[ -]?){15}\d\b"),
            ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
            (
                "health_id",
                r"\b[1-9][AC-HJKMNP-RT-Y][AC-HJKMNP-RT-Y0-9]\d-?[AC-HJKMNP-RT-Y][AC-HJKMNP-RT-Y0-9]\d-?[AC-HJKMNP-RT-Y]{2}\d{2}\b",
            ),
            (
                "email",
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            ),
            ("phone", r"\b(?:\+?\d{1,2}[-. ])?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b"),
        ];

        let patterns = specs
            .into_iter()
            .map(|(name, pattern)| SensitivePattern {
                name,
                // Patterns are fixed literals; a failure here is a bug
                regex: Regex::new(pattern).expect("invalid redaction pattern"),
            })
            .collect();

        Self { patterns }
    }

    /// Masking marker for a pattern
    fn marker(name: &str) -> String {
        format!("[REDACTED:{}]", name)
    }

    /// Redact a single string, returning the masked copy and the number of
    /// replacements made
    pub fn redact_str(&self, input: &str) -> (String, usize) {
        let mut output = input.to_string();
        let mut count = 0;

        for pattern in &self.patterns {
            let matches = pattern.regex.find_iter(&output).count();
            if matches > 0 {
                output = pattern
                    .regex
                    .replace_all(&output, Self::marker(pattern.name))
                    .into_owned();
                count += matches;
            }
        }

        (output, count)
    }

    /// Recursively redact every string value of a JSON value, returning
    /// the masked copy and total replacement count
    pub fn redact_value(&self, value: &Value) -> (Value, usize) {
        match value {
            Value::String(s) => {
                let (redacted, count) = self.redact_str(s);
                (Value::String(redacted), count)
            }
            Value::Array(items) => {
                let mut count = 0;
                let redacted = items
                    .iter()
                    .map(|item| {
                        let (v, c) = self.redact_value(item);
                        count += c;
                        v
                    })
                    .collect();
                (Value::Array(redacted), count)
            }
            Value::Object(map) => {
                let mut count = 0;
                let redacted = map
                    .iter()
                    .map(|(key, item)| {
                        let (v, c) = self.redact_value(item);
                        count += c;
                        (key.clone(), v)
                    })
                    .collect();
                (Value::Object(redacted), count)
            }
            other => (other.clone(), 0),
        }
    }
}
