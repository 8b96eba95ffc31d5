//! Scalar value matchers.
//!
//! A [`ValueMatcher`] tests a single optional string: a header value, a query
//! parameter, the request path or method token. An absent value is an input
//! like any other and never panics.

use crate::error::RuleError;
use regex::Regex;
use std::fmt;

/// Predicate over one optional string value.
#[derive(Debug, Clone)]
pub enum ValueMatcher {
    /// Value equals the given string.
    Equal(String),
    /// Value differs from the given string (absent counts as different).
    NotEqual(String),
    /// Value matches the whole regex.
    Like(Pattern),
    /// Value is present and does not match the whole regex.
    NotLike(Pattern),
    /// Value contains the substring.
    Contains { value: String, ignore_case: bool },
    /// Value is present and does not contain the substring.
    NotContains { value: String, ignore_case: bool },
    /// Anything, including absence.
    Ignore,
}

/// A regex compiled for full-string matching, keeping its source for messages.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile `source` so that it must match the entire input.
    pub fn new(source: &str) -> Result<Self, RuleError> {
        let regex = Regex::new(&format!("^(?:{})$", source)).map_err(|e| RuleError::InvalidRegex {
            pattern: source.to_string(),
            source: e,
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl ValueMatcher {
    pub fn equal(value: impl Into<String>) -> Self {
        ValueMatcher::Equal(value.into())
    }

    pub fn not_equal(value: impl Into<String>) -> Self {
        ValueMatcher::NotEqual(value.into())
    }

    pub fn like(pattern: &str) -> Result<Self, RuleError> {
        Ok(ValueMatcher::Like(Pattern::new(pattern)?))
    }

    pub fn not_like(pattern: &str) -> Result<Self, RuleError> {
        Ok(ValueMatcher::NotLike(Pattern::new(pattern)?))
    }

    pub fn contains(value: impl Into<String>) -> Self {
        ValueMatcher::Contains {
            value: value.into(),
            ignore_case: false,
        }
    }

    pub fn not_contains(value: impl Into<String>) -> Self {
        ValueMatcher::NotContains {
            value: value.into(),
            ignore_case: false,
        }
    }

    /// Make a `Contains`/`NotContains` matcher case-insensitive; no-op otherwise.
    pub fn ignore_case(mut self, ignore: bool) -> Self {
        if let ValueMatcher::Contains { ignore_case, .. }
        | ValueMatcher::NotContains { ignore_case, .. } = &mut self
        {
            *ignore_case = ignore;
        }
        self
    }

    /// Test a possibly absent value.
    pub fn test(&self, actual: Option<&str>) -> bool {
        match (self, actual) {
            (ValueMatcher::Ignore, _) => true,
            (ValueMatcher::NotEqual(expected), actual) => actual != Some(expected.as_str()),
            (_, None) => false,
            (ValueMatcher::Equal(expected), Some(v)) => v == expected,
            (ValueMatcher::Like(pattern), Some(v)) => pattern.is_match(v),
            (ValueMatcher::NotLike(pattern), Some(v)) => !pattern.is_match(v),
            (ValueMatcher::Contains { value, ignore_case }, Some(v)) => {
                contains(v, value, *ignore_case)
            }
            (ValueMatcher::NotContains { value, ignore_case }, Some(v)) => {
                !contains(v, value, *ignore_case)
            }
        }
    }

    /// Short form used in rule labels: the bare value for equality.
    pub fn label(&self) -> String {
        match self {
            ValueMatcher::Equal(value) => value.clone(),
            ValueMatcher::Ignore => "*".to_string(),
            other => other.to_string(),
        }
    }
}

pub(crate) fn contains(haystack: &str, needle: &str, ignore_case: bool) -> bool {
    if ignore_case {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    } else {
        haystack.contains(needle)
    }
}

impl fmt::Display for ValueMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueMatcher::Equal(v) => write!(f, "equal to \"{}\"", v),
            ValueMatcher::NotEqual(v) => write!(f, "not equal to \"{}\"", v),
            ValueMatcher::Like(p) => write!(f, "like \"{}\"", p.as_str()),
            ValueMatcher::NotLike(p) => write!(f, "not like \"{}\"", p.as_str()),
            ValueMatcher::Contains { value, ignore_case } => {
                write!(f, "contains \"{}\"", value)?;
                if *ignore_case {
                    f.write_str(" (ignoring case)")?;
                }
                Ok(())
            }
            ValueMatcher::NotContains { value, ignore_case } => {
                write!(f, "not contains \"{}\"", value)?;
                if *ignore_case {
                    f.write_str(" (ignoring case)")?;
                }
                Ok(())
            }
            ValueMatcher::Ignore => f.write_str("any value"),
        }
    }
}

impl From<&str> for ValueMatcher {
    fn from(value: &str) -> Self {
        ValueMatcher::equal(value)
    }
}

impl From<String> for ValueMatcher {
    fn from(value: String) -> Self {
        ValueMatcher::Equal(value)
    }
}

/// A matcher plus a negation flag, as used by `have`/`dont_have` declarations.
///
/// The outcome is `matcher.test(value) XOR negate`.
#[derive(Debug, Clone)]
pub struct Expectation {
    pub matcher: ValueMatcher,
    pub negate: bool,
}

impl Expectation {
    pub fn have(matcher: ValueMatcher) -> Self {
        Self {
            matcher,
            negate: false,
        }
    }

    pub fn dont_have(matcher: ValueMatcher) -> Self {
        Self {
            matcher,
            negate: true,
        }
    }

    pub fn test(&self, actual: Option<&str>) -> bool {
        self.matcher.test(actual) ^ self.negate
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            write!(f, "not {}", self.matcher)
        } else {
            write!(f, "{}", self.matcher)
        }
    }
}
