//! Configuration for the HTTP double.
//!
//! Defines dispatcher settings and a declarative YAML rule format that is
//! converted into immutable [`Rule`]s.

use crate::content::ContentMatcher;
use crate::dispatcher::INITIAL_STATE;
use crate::error::{Fault, RuleError};
use crate::matcher::RequestPattern;
use crate::params::{HeaderMatcher, ParamsMatcher};
use crate::request::Method;
use crate::rule::{ResponseBody, ResponseTemplate, Rule};
use crate::value::ValueMatcher;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DoubleConfig {
    /// Dispatcher settings
    #[serde(default)]
    pub settings: DispatcherSettings,

    /// Rules, in evaluation order
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl DoubleConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate settings and every rule, loading fixtures and compiling patterns.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.settings.validate()?;
        for (i, rule) in self.rules.iter().enumerate() {
            rule.build().with_context(|| rule_context(i, rule))?;
        }
        Ok(())
    }

    /// Convert the rule specs into rules, in order.
    pub fn into_rules(self) -> anyhow::Result<Vec<Rule>> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, rule)| rule.build().with_context(|| rule_context(i, rule)))
            .collect()
    }
}

fn rule_context(index: usize, rule: &RuleSpec) -> String {
    match &rule.name {
        Some(name) => format!("Rule {} ({})", index, name),
        None => format!("Rule {}", index),
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherSettings {
    /// Status of the diagnostic response when no rule matches
    #[serde(default = "default_no_match_status")]
    pub no_match_status: u16,

    /// State token at start and after `clear()`
    #[serde(default = "default_initial_state")]
    pub initial_state: String,

    /// Log every matched rule
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Content type when neither the rule nor its body names one
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            no_match_status: default_no_match_status(),
            initial_state: default_initial_state(),
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
        }
    }
}

impl DispatcherSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_status(self.no_match_status).context("settings.no_match_status")?;
        if self.initial_state.is_empty() {
            anyhow::bail!("settings.initial_state cannot be empty");
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_no_match_status() -> u16 {
    404
}

fn default_initial_state() -> String {
    INITIAL_STATE.to_string()
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_status() -> u16 {
    200
}

fn check_status(status: u16) -> Result<(), RuleError> {
    if (100..=599).contains(&status) {
        Ok(())
    } else {
        Err(RuleError::InvalidStatus(status))
    }
}

/// A single rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    /// Shown in diagnostics and recorded calls
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub request: RequestSpec,

    #[serde(default)]
    pub response: ResponseSpec,

    /// Fail the call instead of responding
    #[serde(default)]
    pub fault: Option<FaultSpec>,
}

impl RuleSpec {
    /// Build the immutable rule, failing on bad patterns or fixtures.
    pub fn build(&self) -> anyhow::Result<Rule> {
        let pattern = self.request.build()?;
        let mut response = self.response.build()?;
        response.fault = self.fault.as_ref().map(FaultSpec::to_fault);

        let rule = Rule::new(pattern, response);
        Ok(match &self.name {
            Some(name) => rule.with_name(name.as_str()),
            None => rule,
        })
    }
}

/// A value matcher: a plain string for equality or a tagged matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Plain(String),
    Matcher(MatcherSpec),
}

/// Tagged value matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatcherSpec {
    Equal {
        value: String,
    },
    NotEqual {
        value: String,
    },
    /// Full-string regex match
    Like {
        pattern: String,
    },
    NotLike {
        pattern: String,
    },
    Contains {
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    NotContains {
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    /// Any value, including absence
    Ignore,
}

impl ValueSpec {
    pub fn to_matcher(&self) -> Result<ValueMatcher, RuleError> {
        Ok(match self {
            ValueSpec::Plain(value) => ValueMatcher::equal(value.as_str()),
            ValueSpec::Matcher(spec) => match spec {
                MatcherSpec::Equal { value } => ValueMatcher::equal(value.as_str()),
                MatcherSpec::NotEqual { value } => ValueMatcher::not_equal(value.as_str()),
                MatcherSpec::Like { pattern } => ValueMatcher::like(pattern)?,
                MatcherSpec::NotLike { pattern } => ValueMatcher::not_like(pattern)?,
                MatcherSpec::Contains { value, ignore_case } => {
                    ValueMatcher::contains(value.as_str()).ignore_case(*ignore_case)
                }
                MatcherSpec::NotContains { value, ignore_case } => {
                    ValueMatcher::not_contains(value.as_str()).ignore_case(*ignore_case)
                }
                MatcherSpec::Ignore => ValueMatcher::Ignore,
            },
        })
    }
}

/// Request side of a rule. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestSpec {
    /// Required dispatcher state
    #[serde(default)]
    pub state: Option<ValueSpec>,

    /// Method; a plain value is parsed as an HTTP method
    #[serde(default)]
    pub method: Option<ValueSpec>,

    #[serde(default)]
    pub path: Option<ValueSpec>,

    /// Media type of the request, parameters excluded
    #[serde(default)]
    pub content_type: Option<ValueSpec>,

    /// Headers that must match
    #[serde(default)]
    pub headers: BTreeMap<String, ValueSpec>,

    /// Headers that must not match (absent passes)
    #[serde(default)]
    pub absent_headers: BTreeMap<String, ValueSpec>,

    #[serde(default)]
    pub query: Option<ParamsSpec>,

    #[serde(default)]
    pub form: Option<ParamsSpec>,

    #[serde(default)]
    pub body: Option<BodySpec>,
}

impl RequestSpec {
    pub fn build(&self) -> anyhow::Result<RequestPattern> {
        let mut builder = RequestPattern::builder();

        if let Some(state) = &self.state {
            builder = builder.state(state.to_matcher()?);
        }
        if let Some(method) = &self.method {
            builder = match method {
                ValueSpec::Plain(name) => builder.method(
                    name.parse::<Method>()
                        .map_err(anyhow::Error::msg)?,
                ),
                other => builder.method_matching(other.to_matcher()?),
            };
        }
        if let Some(path) = &self.path {
            builder = builder.path(path.to_matcher()?);
        }
        if let Some(content_type) = &self.content_type {
            builder = builder.content_type(content_type.to_matcher()?);
        }

        let mut headers = HeaderMatcher::new();
        for (name, spec) in &self.headers {
            headers = headers.have(name.as_str(), spec.to_matcher()?);
        }
        for (name, spec) in &self.absent_headers {
            headers = headers.dont_have(name.as_str(), spec.to_matcher()?);
        }
        builder = builder.headers(headers);

        if let Some(query) = &self.query {
            builder = builder.query(query.build(ParamsMatcher::query())?);
        }
        if let Some(form) = &self.form {
            builder = builder.form(form.build(ParamsMatcher::form())?);
        }
        if let Some(body) = &self.body {
            builder = builder.body(body.build()?);
        }

        Ok(builder.build())
    }
}

/// Query parameter or form field constraints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamsSpec {
    /// Each listed matcher must be satisfied by some value of the key
    #[serde(default)]
    pub params: BTreeMap<String, Vec<ValueSpec>>,

    /// No value of the key may satisfy the matcher; an absent key passes
    #[serde(default)]
    pub absent: BTreeMap<String, ValueSpec>,

    /// Keys that may be present or absent with any value
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Reject keys that are not declared
    #[serde(default)]
    pub strict: bool,
}

impl ParamsSpec {
    fn build(&self, mut matcher: ParamsMatcher) -> Result<ParamsMatcher, RuleError> {
        for (key, specs) in &self.params {
            for spec in specs {
                matcher = matcher.have(key.as_str(), spec.to_matcher()?);
            }
        }
        for (key, spec) in &self.absent {
            matcher = matcher.dont_have(key.as_str(), spec.to_matcher()?);
        }
        for key in &self.ignore {
            matcher = matcher.ignore(key.as_str());
        }
        Ok(matcher.ignore_unknown(!self.strict))
    }
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodySpec {
    /// Byte-exact body
    Exact { content: String },
    /// Byte-exact body read from a fixture file
    File { path: PathBuf },
    /// Full-string regex over the body
    Regex { pattern: String },
    Contains {
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    NotContains {
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    /// Semantic JSON comparison
    Json {
        #[serde(default)]
        content: Option<serde_json::Value>,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        ignore_fields: Vec<String>,
        #[serde(default)]
        ignore_unknown_keys: bool,
    },
    /// Semantic XML comparison
    Xml {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Form-encoded body with exact per-key values
    Form {
        content: String,
        #[serde(default)]
        ignore_fields: Vec<String>,
        #[serde(default = "default_true")]
        ignore_unknown_keys: bool,
    },
}

impl BodySpec {
    pub fn build(&self) -> anyhow::Result<ContentMatcher> {
        Ok(match self {
            BodySpec::Exact { content } => ContentMatcher::exact(content.as_bytes()),
            BodySpec::File { path } => ContentMatcher::exact_from_file(path)?,
            BodySpec::Regex { pattern } => ContentMatcher::regex(pattern)?,
            BodySpec::Contains { value, ignore_case } => {
                ContentMatcher::contains(value.as_str()).ignore_case(*ignore_case)
            }
            BodySpec::NotContains { value, ignore_case } => {
                ContentMatcher::not_contains(value.as_str()).ignore_case(*ignore_case)
            }
            BodySpec::Json {
                content,
                path,
                ignore_fields,
                ignore_unknown_keys,
            } => {
                let matcher = match (content, path) {
                    (Some(content), None) => ContentMatcher::json_value(content),
                    (None, Some(path)) => ContentMatcher::json_from_file(path)?,
                    _ => anyhow::bail!("json body needs exactly one of 'content' or 'path'"),
                };
                matcher
                    .ignore_fields(ignore_fields.iter().cloned())
                    .ignore_unknown_keys(*ignore_unknown_keys)
            }
            BodySpec::Xml { content, path } => match (content, path) {
                (Some(content), None) => ContentMatcher::xml(content.as_bytes()),
                (None, Some(path)) => ContentMatcher::xml_from_file(path)?,
                _ => anyhow::bail!("xml body needs exactly one of 'content' or 'path'"),
            },
            BodySpec::Form {
                content,
                ignore_fields,
                ignore_unknown_keys,
            } => ContentMatcher::form_from_encoded(content)?
                .ignore_fields(ignore_fields.iter().cloned())
                .ignore_unknown_keys(*ignore_unknown_keys),
        })
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseSpec {
    #[serde(default = "default_status")]
    pub status: u16,

    /// Extra response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub body: Option<ResponseBodySpec>,

    /// Render text and JSON bodies as Handlebars templates
    #[serde(default)]
    pub template: bool,

    /// State to move to once the rule matches
    #[serde(default)]
    pub next_state: Option<String>,
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            content_type: None,
            body: None,
            template: false,
            next_state: None,
        }
    }
}

impl ResponseSpec {
    pub fn build(&self) -> anyhow::Result<ResponseTemplate> {
        check_status(self.status)?;

        let body = match &self.body {
            None => ResponseBody::Empty,
            Some(ResponseBodySpec::Text { content }) if self.template => {
                ResponseBody::Template(content.clone())
            }
            Some(ResponseBodySpec::Text { content }) => ResponseBody::text(content.as_str()),
            Some(ResponseBodySpec::Json { content }) if self.template => {
                ResponseBody::JsonTemplate(content.clone())
            }
            Some(ResponseBodySpec::Json { content }) => ResponseBody::Json(content.clone()),
            Some(ResponseBodySpec::Base64 { content }) => ResponseBody::from_base64(content)?,
            Some(ResponseBodySpec::File { path }) => ResponseBody::from_file(path)?,
        };

        let mut response = ResponseTemplate::new(self.status).body(body);
        for (name, value) in &self.headers {
            response = response.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = &self.content_type {
            response = response.content_type(content_type.as_str());
        }
        if let Some(state) = &self.next_state {
            response = response.next_state(state.as_str());
        }
        Ok(response)
    }
}

/// Response body configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBodySpec {
    Text { content: String },
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file at startup
    File { path: PathBuf },
}

/// Fault injection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultSpec {
    ConnectionRefused,
    Timeout,
    Error { message: String },
}

impl FaultSpec {
    pub fn to_fault(&self) -> Fault {
        match self {
            FaultSpec::ConnectionRefused => Fault::ConnectionRefused,
            FaultSpec::Timeout => Fault::Timeout,
            FaultSpec::Error { message } => Fault::Message(message.clone()),
        }
    }
}
