//! Rules: an immutable request pattern paired with a response template.

use crate::error::{Fault, RuleError};
use crate::matcher::{PatternBuilder, RequestPattern};
use crate::request::{Method, Request};
use crate::value::ValueMatcher;
use base64::Engine as _;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Closure producing a response body from the matched request.
pub type BodyGenerator = Arc<dyn Fn(&Request) -> Vec<u8> + Send + Sync>;

/// How a response body is produced.
#[derive(Clone, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    /// Handlebars text template.
    Template(String),
    /// JSON value whose string leaves are Handlebars templates.
    JsonTemplate(serde_json::Value),
    Generator(BodyGenerator),
}

impl ResponseBody {
    pub fn text(content: impl Into<String>) -> Self {
        ResponseBody::Bytes(content.into().into_bytes())
    }

    /// Load the body from a fixture file, read now.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        std::fs::read(path)
            .map(ResponseBody::Bytes)
            .map_err(|source| RuleError::Fixture {
                path: path.display().to_string(),
                source,
            })
    }

    pub fn from_base64(encoded: &str) -> Result<Self, RuleError> {
        Ok(ResponseBody::Bytes(
            base64::engine::general_purpose::STANDARD.decode(encoded)?,
        ))
    }

    pub fn generator<F>(f: F) -> Self
    where
        F: Fn(&Request) -> Vec<u8> + Send + Sync + 'static,
    {
        ResponseBody::Generator(Arc::new(f))
    }

    /// Natural content type of the body, if it has one.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            ResponseBody::Json(_) | ResponseBody::JsonTemplate(_) => Some("application/json"),
            _ => None,
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Empty => f.write_str("Empty"),
            ResponseBody::Bytes(bytes) => f
                .debug_tuple("Bytes")
                .field(&String::from_utf8_lossy(bytes))
                .finish(),
            ResponseBody::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ResponseBody::Template(t) => f.debug_tuple("Template").field(t).finish(),
            ResponseBody::JsonTemplate(v) => f.debug_tuple("JsonTemplate").field(v).finish(),
            ResponseBody::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// What a matched rule produces.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Overrides the body's natural content type and the dispatcher default.
    pub content_type: Option<String>,
    pub body: ResponseBody,
    /// Returned from dispatch instead of a response.
    pub fault: Option<Fault>,
    /// State the dispatcher moves to once this rule matches.
    pub next_state: Option<String>,
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            content_type: None,
            body: ResponseBody::Empty,
            fault: None,
            next_state: None,
        }
    }
}

impl ResponseTemplate {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn ok() -> Self {
        Self::default()
    }

    /// A response that fails the call with `fault` instead.
    pub fn fault(fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..Default::default()
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }

    pub fn text(self, body: impl Into<String>) -> Self {
        self.body(ResponseBody::text(body))
    }

    pub fn json(self, body: serde_json::Value) -> Self {
        self.body(ResponseBody::Json(body))
    }

    pub fn template(self, template: impl Into<String>) -> Self {
        self.body(ResponseBody::Template(template.into()))
    }

    pub fn generate<F>(self, f: F) -> Self
    where
        F: Fn(&Request) -> Vec<u8> + Send + Sync + 'static,
    {
        self.body(ResponseBody::generator(f))
    }

    pub fn next_state(mut self, state: impl Into<String>) -> Self {
        self.next_state = Some(state.into());
        self
    }
}

/// A registered (pattern, response) pair. Immutable once built.
#[derive(Debug, Clone)]
pub struct Rule {
    name: Option<String>,
    pattern: RequestPattern,
    response: ResponseTemplate,
}

impl Rule {
    pub fn new(pattern: impl Into<RequestPattern>, response: ResponseTemplate) -> Self {
        Self {
            name: None,
            pattern: pattern.into(),
            response,
        }
    }

    /// Start a pattern preset to `method` and an exact or custom path.
    pub fn on(method: Method, path: impl Into<ValueMatcher>) -> PatternBuilder {
        RequestPattern::builder().method(method).path(path)
    }

    pub fn get(path: impl Into<ValueMatcher>) -> PatternBuilder {
        Self::on(Method::Get, path)
    }

    pub fn post(path: impl Into<ValueMatcher>) -> PatternBuilder {
        Self::on(Method::Post, path)
    }

    pub fn put(path: impl Into<ValueMatcher>) -> PatternBuilder {
        Self::on(Method::Put, path)
    }

    pub fn delete(path: impl Into<ValueMatcher>) -> PatternBuilder {
        Self::on(Method::Delete, path)
    }

    pub fn patch(path: impl Into<ValueMatcher>) -> PatternBuilder {
        Self::on(Method::Patch, path)
    }

    pub fn head(path: impl Into<ValueMatcher>) -> PatternBuilder {
        Self::on(Method::Head, path)
    }

    /// Name shown in diagnostics and recorded calls.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn pattern(&self) -> &RequestPattern {
        &self.pattern
    }

    pub fn response(&self) -> &ResponseTemplate {
        &self.response
    }

    /// `[GET /path]`, prefixed with the rule name when it has one.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}", name, self.pattern.label()),
            None => self.pattern.label(),
        }
    }
}

/// Finishes a rule after its response is known.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.rule = self.rule.with_name(name);
        self
    }

    pub fn build(self) -> Rule {
        self.rule
    }
}

impl From<RuleBuilder> for Rule {
    fn from(builder: RuleBuilder) -> Self {
        builder.build()
    }
}

impl PatternBuilder {
    /// Attach the response, turning the pattern into a rule.
    pub fn respond(self, response: ResponseTemplate) -> RuleBuilder {
        RuleBuilder {
            rule: Rule::new(self.build(), response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_verb_constructors() {
        let rule: Rule = Rule::post("/api/bookings")
            .respond(ResponseTemplate::new(201))
            .build();
        assert_eq!(rule.label(), "[POST /api/bookings]");
        assert_eq!(rule.response().status, 201);
        assert!(rule.name().is_none());

        let rule = Rule::get("/health")
            .respond(ResponseTemplate::ok().text("up"))
            .name("health")
            .build();
        assert_eq!(rule.label(), "health [GET /health]");
    }

    #[test]
    fn test_response_defaults() {
        let response = ResponseTemplate::default();
        assert_eq!(response.status, 200);
        assert!(matches!(response.body, ResponseBody::Empty));
        assert!(response.fault.is_none());
        assert!(response.next_state.is_none());
    }

    #[test]
    fn test_body_content_type_hint() {
        assert_eq!(
            ResponseBody::Json(serde_json::json!({})).content_type(),
            Some("application/json")
        );
        assert_eq!(ResponseBody::text("x").content_type(), None);
    }

    #[test]
    fn test_body_fixtures() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"ok\":true}").unwrap();
        assert!(matches!(
            ResponseBody::from_file(file.path()).unwrap(),
            ResponseBody::Bytes(bytes) if bytes == b"{\"ok\":true}"
        ));
        assert!(ResponseBody::from_file("/missing/fixture").is_err());

        assert!(matches!(
            ResponseBody::from_base64("aGVsbG8=").unwrap(),
            ResponseBody::Bytes(bytes) if bytes == b"hello"
        ));
        assert!(matches!(
            ResponseBody::from_base64("!!").unwrap_err(),
            RuleError::InvalidBase64(_)
        ));
    }

    #[test]
    fn test_fault_response() {
        let response = ResponseTemplate::fault(Fault::Timeout).next_state("FAILED");
        assert!(matches!(response.fault, Some(Fault::Timeout)));
        assert_eq!(response.next_state.as_deref(), Some("FAILED"));
    }
}
