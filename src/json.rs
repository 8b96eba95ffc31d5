//! Semantic JSON comparison.
//!
//! Compares parsed documents rather than bytes: key order, whitespace and
//! numeric formatting (`1.0` vs `1.00`) do not matter, array order does.

use crate::matcher::MatchOutcome;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeSet;

/// Options controlling a JSON comparison.
#[derive(Debug, Clone, Default)]
pub struct JsonOptions {
    /// Field names skipped at every depth.
    pub ignore_fields: BTreeSet<String>,
    /// Accept fields in the actual document that the expected one lacks.
    pub ignore_unknown_keys: bool,
}

/// Compare raw bodies, reporting decode failures as mismatches.
pub fn compare_bytes(actual: &[u8], expected: &[u8], options: &JsonOptions) -> MatchOutcome {
    let actual: Value = match serde_json::from_slice(actual) {
        Ok(v) => v,
        Err(e) => return MatchOutcome::mismatch(format!("Unable to decode body: {}", e)),
    };
    let expected: Value = match serde_json::from_slice(expected) {
        Ok(v) => v,
        Err(e) => return MatchOutcome::mismatch(format!("Unable to decode target: {}", e)),
    };
    compare(&actual, &expected, options)
}

/// Compare two parsed documents starting at path `$`.
pub fn compare(actual: &Value, expected: &Value, options: &JsonOptions) -> MatchOutcome {
    compare_at(actual, expected, "$", options)
}

fn compare_at(actual: &Value, expected: &Value, path: &str, options: &JsonOptions) -> MatchOutcome {
    match expected {
        Value::Array(expected_items) => {
            let Value::Array(actual_items) = actual else {
                return MatchOutcome::mismatch(format!("Expecting an array at path {}", path));
            };
            if actual_items.len() != expected_items.len() {
                return MatchOutcome::mismatch(format!(
                    "Arrays at {} have different sizes: expected {} but was {}",
                    path,
                    expected_items.len(),
                    actual_items.len()
                ));
            }
            for (i, (a, e)) in actual_items.iter().zip(expected_items).enumerate() {
                let outcome = compare_at(a, e, &format!("{}[{}]", path, i), options);
                if !outcome.is_match() {
                    return outcome;
                }
            }
            MatchOutcome::Match
        }

        Value::Object(expected_fields) => {
            let Value::Object(actual_fields) = actual else {
                return MatchOutcome::mismatch(format!("Expecting an object at path {}", path));
            };

            if !options.ignore_unknown_keys {
                let unexpected: Vec<&str> = actual_fields
                    .iter()
                    .filter(|(k, v)| {
                        !v.is_null()
                            && !expected_fields.contains_key(*k)
                            && !options.ignore_fields.contains(*k)
                    })
                    .map(|(k, _)| k.as_str())
                    .collect();
                if !unexpected.is_empty() {
                    return MatchOutcome::mismatch(format!(
                        "Objects at {} have unexpected keys [{}]",
                        path,
                        unexpected.join(", ")
                    ));
                }
            }

            for (key, expected_value) in expected_fields {
                if options.ignore_fields.contains(key) || expected_value.is_null() {
                    // null in the expected document marks the field optional
                    continue;
                }
                let Some(actual_value) = actual_fields.get(key) else {
                    return MatchOutcome::mismatch(format!(
                        "Missing key '{}' at path {}",
                        key, path
                    ));
                };
                let outcome =
                    compare_at(actual_value, expected_value, &format!("{}.{}", path, key), options);
                if !outcome.is_match() {
                    return outcome;
                }
            }
            MatchOutcome::Match
        }

        Value::Null => {
            if actual.is_null() {
                MatchOutcome::Match
            } else {
                MatchOutcome::mismatch(format!("Expected null but was {} at path {}", actual, path))
            }
        }

        scalar => {
            if scalars_equal(actual, scalar) {
                MatchOutcome::Match
            } else {
                MatchOutcome::mismatch(format!(
                    "Expected {} but was {} at path {}",
                    scalar, actual, path
                ))
            }
        }
    }
}

/// Textual content of a scalar; strings are unquoted.
fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
        _ => None,
    }
}

fn scalars_equal(actual: &Value, expected: &Value) -> bool {
    let (Some(a), Some(e)) = (scalar_text(actual), scalar_text(expected)) else {
        return false;
    };
    if a == e {
        return true;
    }
    match (a.parse::<f64>(), e.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}
