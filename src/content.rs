//! Body content matchers.

use crate::error::RuleError;
use crate::json::{self, JsonOptions};
use crate::matcher::MatchOutcome;
use crate::params::{MultiValueMap, ParamsMatcher};
use crate::value::{self, Pattern};
use crate::xml;
use std::fmt;
use std::path::Path;

/// Comparison applied to the raw request body.
#[derive(Debug, Clone)]
pub enum ContentMatcher {
    /// Byte-for-byte equality.
    Exact(Vec<u8>),
    /// The whole body, as UTF-8, matches the regex.
    Regex(Pattern),
    /// The body, as UTF-8, contains the substring.
    Contains { value: String, ignore_case: bool },
    /// The body, as UTF-8, does not contain the substring.
    NotContains { value: String, ignore_case: bool },
    /// Semantic JSON equality against the expected document.
    Json {
        expected: Vec<u8>,
        options: JsonOptions,
    },
    /// Semantic XML equality against the expected document.
    Xml(Vec<u8>),
    /// Form-encoded body checked field by field.
    Form(ParamsMatcher),
}

impl ContentMatcher {
    pub fn exact(expected: impl Into<Vec<u8>>) -> Self {
        ContentMatcher::Exact(expected.into())
    }

    /// Exact match against a fixture file, read now.
    pub fn exact_from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        Ok(ContentMatcher::Exact(read_fixture(path.as_ref())?))
    }

    pub fn regex(pattern: &str) -> Result<Self, RuleError> {
        Ok(ContentMatcher::Regex(Pattern::new(pattern)?))
    }

    pub fn contains(value: impl Into<String>) -> Self {
        ContentMatcher::Contains {
            value: value.into(),
            ignore_case: false,
        }
    }

    pub fn not_contains(value: impl Into<String>) -> Self {
        ContentMatcher::NotContains {
            value: value.into(),
            ignore_case: false,
        }
    }

    /// Semantic JSON match against raw expected bytes.
    ///
    /// The expected document is parsed on every evaluation, so a malformed
    /// target surfaces as a mismatch rather than a build error.
    pub fn json(expected: impl Into<Vec<u8>>) -> Self {
        ContentMatcher::Json {
            expected: expected.into(),
            options: JsonOptions::default(),
        }
    }

    pub fn json_value(expected: &serde_json::Value) -> Self {
        Self::json(expected.to_string())
    }

    pub fn json_from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        Ok(Self::json(read_fixture(path.as_ref())?))
    }

    pub fn xml(expected: impl Into<Vec<u8>>) -> Self {
        ContentMatcher::Xml(expected.into())
    }

    pub fn xml_from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        Ok(Self::xml(read_fixture(path.as_ref())?))
    }

    pub fn form(matcher: ParamsMatcher) -> Self {
        ContentMatcher::Form(matcher)
    }

    /// Exact per-key value lists taken from an encoded body such as `a=1&b=2`.
    pub fn form_from_encoded(expected: &str) -> Result<Self, RuleError> {
        ParamsMatcher::form_from_encoded(expected)
            .map(ContentMatcher::Form)
            .map_err(RuleError::InvalidForm)
    }

    /// Substring matchers only: compare case-insensitively.
    pub fn ignore_case(mut self, ignore: bool) -> Self {
        if let ContentMatcher::Contains { ignore_case, .. }
        | ContentMatcher::NotContains { ignore_case, .. } = &mut self
        {
            *ignore_case = ignore;
        }
        self
    }

    /// JSON and form matchers: tolerate keys the expectation does not name.
    pub fn ignore_unknown_keys(self, ignore: bool) -> Self {
        match self {
            ContentMatcher::Json {
                expected,
                mut options,
            } => {
                options.ignore_unknown_keys = ignore;
                ContentMatcher::Json { expected, options }
            }
            ContentMatcher::Form(matcher) => ContentMatcher::Form(matcher.ignore_unknown(ignore)),
            other => other,
        }
    }

    /// JSON and form matchers: skip these field names. JSON skips them at
    /// every depth.
    pub fn ignore_fields<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = fields.into_iter().map(Into::into);
        match self {
            ContentMatcher::Json {
                expected,
                mut options,
            } => {
                options.ignore_fields.extend(fields);
                ContentMatcher::Json { expected, options }
            }
            ContentMatcher::Form(matcher) => {
                ContentMatcher::Form(fields.fold(matcher, ParamsMatcher::ignore))
            }
            other => other,
        }
    }

    pub fn evaluate(&self, body: &[u8]) -> MatchOutcome {
        match self {
            ContentMatcher::Exact(expected) => {
                if body == expected.as_slice() {
                    MatchOutcome::Match
                } else {
                    MatchOutcome::mismatch("Byte content mismatch")
                }
            }

            ContentMatcher::Regex(pattern) => match std::str::from_utf8(body) {
                Ok(text) if pattern.is_match(text) => MatchOutcome::Match,
                Ok(_) => MatchOutcome::mismatch(format!(
                    "Body mismatch: expected to match regex '{}'",
                    pattern.as_str()
                )),
                Err(e) => MatchOutcome::mismatch(format!("Unable to decode body: {}", e)),
            },

            ContentMatcher::Contains { value, ignore_case } => match std::str::from_utf8(body) {
                Ok(text) if value::contains(text, value, *ignore_case) => MatchOutcome::Match,
                Ok(_) => MatchOutcome::mismatch(format!(
                    "Body mismatch: expected to contain '{}'",
                    value
                )),
                Err(e) => MatchOutcome::mismatch(format!("Unable to decode body: {}", e)),
            },

            ContentMatcher::NotContains { value, ignore_case } => {
                match std::str::from_utf8(body) {
                    Ok(text) if !value::contains(text, value, *ignore_case) => MatchOutcome::Match,
                    Ok(_) => MatchOutcome::mismatch(format!(
                        "Body mismatch: expected not to contain '{}'",
                        value
                    )),
                    Err(e) => MatchOutcome::mismatch(format!("Unable to decode body: {}", e)),
                }
            }

            ContentMatcher::Json { expected, options } => {
                json::compare_bytes(body, expected, options)
            }

            ContentMatcher::Xml(expected) => xml::compare_bytes(body, expected),

            ContentMatcher::Form(matcher) => {
                let fields = std::str::from_utf8(body)
                    .map_err(|e| e.to_string())
                    .and_then(MultiValueMap::parse_urlencoded);
                match fields {
                    Ok(fields) => matcher.evaluate(&fields),
                    Err(e) => MatchOutcome::mismatch(format!("Unable to parse body: {}", e)),
                }
            }
        }
    }
}

fn read_fixture(path: &Path) -> Result<Vec<u8>, RuleError> {
    std::fs::read(path).map_err(|source| RuleError::Fixture {
        path: path.display().to_string(),
        source,
    })
}

impl fmt::Display for ContentMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentMatcher::Exact(bytes) => write!(f, "exactly {} byte(s)", bytes.len()),
            ContentMatcher::Regex(pattern) => write!(f, "like \"{}\"", pattern.as_str()),
            ContentMatcher::Contains { value, .. } => write!(f, "contains \"{}\"", value),
            ContentMatcher::NotContains { value, .. } => write!(f, "not contains \"{}\"", value),
            ContentMatcher::Json { expected, .. } => {
                write!(f, "json {}", String::from_utf8_lossy(expected))
            }
            ContentMatcher::Xml(expected) => write!(f, "xml {}", String::from_utf8_lossy(expected)),
            ContentMatcher::Form(matcher) => write!(f, "form [{}]", matcher.describe().join(", ")),
        }
    }
}
