//! Request matching logic.
//!
//! A [`RequestPattern`] is the predicate half of a rule. Evaluation runs a
//! fixed pipeline and stops at the first failing stage:
//!
//! state → method → path → content-type → headers → query → form → custom → body

use crate::content::ContentMatcher;
use crate::params::{HeaderMatcher, MultiValueMap, ParamsMatcher};
use crate::request::{Method, Request};
use crate::value::ValueMatcher;
use std::fmt;
use std::sync::Arc;

/// Result of evaluating a matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Match,
    Mismatch { reason: String },
}

impl MatchOutcome {
    pub fn mismatch(reason: impl Into<String>) -> Self {
        MatchOutcome::Mismatch {
            reason: reason.into(),
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Match)
    }

    /// The mismatch reason, `None` on a match.
    pub fn reason(&self) -> Option<&str> {
        match self {
            MatchOutcome::Match => None,
            MatchOutcome::Mismatch { reason } => Some(reason),
        }
    }
}

/// Arbitrary request predicate.
pub type Predicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Immutable request predicate shared by rules and verification.
///
/// Stages without a matcher are vacuously true.
#[derive(Clone)]
pub struct RequestPattern {
    state: Option<ValueMatcher>,
    method: Option<ValueMatcher>,
    path: Option<ValueMatcher>,
    content_type: Option<ValueMatcher>,
    headers: HeaderMatcher,
    query: ParamsMatcher,
    form: ParamsMatcher,
    custom: Option<Predicate>,
    body: Option<ContentMatcher>,
}

impl Default for RequestPattern {
    fn default() -> Self {
        Self {
            state: None,
            method: None,
            path: None,
            content_type: None,
            headers: HeaderMatcher::new(),
            query: ParamsMatcher::query(),
            form: ParamsMatcher::form(),
            custom: None,
            body: None,
        }
    }
}

impl RequestPattern {
    /// A pattern matching every request.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn builder() -> PatternBuilder {
        PatternBuilder::default()
    }

    /// Evaluate `request` with the dispatcher in `state`.
    pub fn evaluate(&self, request: &Request, state: &str) -> MatchOutcome {
        if let Some(expected) = &self.state {
            if !expected.test(Some(state)) {
                return MatchOutcome::mismatch(format!(
                    "State mismatch: expected {} but was {}",
                    expected.label(),
                    state
                ));
            }
        }

        if let Some(expected) = &self.method {
            if !expected.test(Some(request.method.as_str())) {
                return MatchOutcome::mismatch(format!(
                    "Method mismatch: expected {} but was {}",
                    expected.label(),
                    request.method
                ));
            }
        }

        if let Some(expected) = &self.path {
            if !expected.test(Some(request.path.as_str())) {
                return MatchOutcome::mismatch(format!(
                    "Path mismatch: expected {} but was {}",
                    expected.label(),
                    request.path
                ));
            }
        }

        if let Some(expected) = &self.content_type {
            let actual = request.content_type().map(media_type);
            if !expected.test(actual) {
                return MatchOutcome::mismatch(format!(
                    "Content-Type mismatch: expected {} but was {}",
                    expected.label(),
                    actual.unwrap_or("missing")
                ));
            }
        }

        if !self.headers.is_empty() {
            let outcome = self.headers.evaluate(&request.headers);
            if !outcome.is_match() {
                return outcome;
            }
        }

        let outcome = self.query.evaluate(&request.query);
        if !outcome.is_match() {
            return outcome;
        }

        if !self.form.is_empty() {
            let fields = match std::str::from_utf8(&request.body) {
                Ok(text) => MultiValueMap::parse_urlencoded(text),
                Err(e) => Err(e.to_string()),
            };
            let outcome = match fields {
                Ok(fields) => self.form.evaluate(&fields),
                Err(e) => MatchOutcome::mismatch(format!("Unable to parse body: {}", e)),
            };
            if !outcome.is_match() {
                return outcome;
            }
        }

        if let Some(predicate) = &self.custom {
            if !predicate(request) {
                return MatchOutcome::mismatch("Custom matcher failed");
            }
        }

        match &self.body {
            Some(matcher) => matcher.evaluate(&request.body),
            None => MatchOutcome::Match,
        }
    }

    /// Short identifier used in diagnostics, e.g. `[GET /api/users]`.
    pub fn label(&self) -> String {
        let method = self.method.as_ref().map_or("*".to_string(), ValueMatcher::label);
        let path = self.path.as_ref().map_or("*".to_string(), ValueMatcher::label);
        format!("[{} {}]", method, path)
    }

    /// Human-readable description of every configured constraint.
    fn constraints(&self) -> Vec<String> {
        let mut parts = Vec::new();
        if let Some(state) = &self.state {
            parts.push(format!("state {}", state));
        }
        if let Some(content_type) = &self.content_type {
            parts.push(format!("content type {}", content_type));
        }
        parts.extend(self.headers.describe());
        parts.extend(self.query.describe());
        parts.extend(self.form.describe());
        if self.custom.is_some() {
            parts.push("custom predicate".to_string());
        }
        if let Some(body) = &self.body {
            parts.push(format!("body {}", body));
        }
        parts
    }
}

/// Media type without parameters: `application/json; charset=utf-8` → `application/json`.
fn media_type(value: &str) -> &str {
    value.split(';').next().unwrap_or(value).trim()
}

impl fmt::Display for RequestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())?;
        let constraints = self.constraints();
        if !constraints.is_empty() {
            write!(f, " with {}", constraints.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Debug for RequestPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPattern")
            .field("state", &self.state)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("form", &self.form)
            .field("custom", &self.custom.is_some())
            .field("body", &self.body)
            .finish()
    }
}

/// Mutable builder producing an immutable [`RequestPattern`].
#[derive(Debug, Clone, Default)]
pub struct PatternBuilder {
    pattern: RequestPattern,
}

impl PatternBuilder {
    /// Only match while the dispatcher is in `state`.
    pub fn state(mut self, state: impl Into<ValueMatcher>) -> Self {
        self.pattern.state = Some(state.into());
        self
    }

    pub fn method(self, method: Method) -> Self {
        self.method_matching(ValueMatcher::equal(method.as_str()))
    }

    /// Match the method token with an arbitrary matcher.
    pub fn method_matching(mut self, matcher: ValueMatcher) -> Self {
        self.pattern.method = Some(matcher);
        self
    }

    pub fn path(mut self, path: impl Into<ValueMatcher>) -> Self {
        self.pattern.path = Some(path.into());
        self
    }

    /// Match the media type of the `Content-Type` header, parameters excluded.
    pub fn content_type(mut self, content_type: impl Into<ValueMatcher>) -> Self {
        self.pattern.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, matcher: impl Into<ValueMatcher>) -> Self {
        self.pattern.headers = self.pattern.headers.have(name, matcher.into());
        self
    }

    /// Require header `name` not to satisfy `matcher`. Passes when the header is absent.
    pub fn without_header(
        mut self,
        name: impl Into<String>,
        matcher: impl Into<ValueMatcher>,
    ) -> Self {
        self.pattern.headers = self.pattern.headers.dont_have(name, matcher.into());
        self
    }

    pub fn headers(mut self, headers: HeaderMatcher) -> Self {
        self.pattern.headers = headers;
        self
    }

    pub fn query_param(mut self, key: impl Into<String>, matcher: impl Into<ValueMatcher>) -> Self {
        self.pattern.query = self.pattern.query.have(key, matcher.into());
        self
    }

    pub fn query(mut self, query: ParamsMatcher) -> Self {
        self.pattern.query = query;
        self
    }

    pub fn form_param(mut self, key: impl Into<String>, matcher: impl Into<ValueMatcher>) -> Self {
        self.pattern.form = self.pattern.form.have(key, matcher.into());
        self
    }

    pub fn form(mut self, form: ParamsMatcher) -> Self {
        self.pattern.form = form;
        self
    }

    /// Add an arbitrary predicate, evaluated after the declarative stages.
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.pattern.custom = Some(Arc::new(predicate));
        self
    }

    pub fn body(mut self, matcher: ContentMatcher) -> Self {
        self.pattern.body = Some(matcher);
        self
    }

    pub fn build(self) -> RequestPattern {
        self.pattern
    }
}

impl From<PatternBuilder> for RequestPattern {
    fn from(builder: PatternBuilder) -> Self {
        builder.build()
    }
}
