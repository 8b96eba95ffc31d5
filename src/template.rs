//! Template engine for dynamic responses.
//!
//! Uses Handlebars with a context built from the matched request and the
//! dispatcher state at match time.

use crate::request::Request;
use handlebars::{handlebars_helper, Handlebars, RenderError, RenderErrorReason};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Values exposed to templates.
#[derive(Debug, Serialize)]
struct TemplateContext<'a> {
    method: &'a str,
    path: &'a str,
    /// First value of each query parameter
    query: BTreeMap<&'a str, &'a str>,
    /// First value of each header, names lower-cased
    headers: BTreeMap<String, &'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json: Option<Value>,
    state: &'a str,
}

impl<'a> TemplateContext<'a> {
    fn new(request: &'a Request, state: &'a str) -> Self {
        let body = request.body_str();
        Self {
            method: request.method.as_str(),
            path: &request.path,
            query: request
                .query
                .iter()
                .filter_map(|(k, values)| values.first().map(|v| (k, v.as_str())))
                .collect(),
            headers: request
                .headers
                .iter()
                .filter_map(|(k, values)| values.first().map(|v| (k.to_lowercase(), v.as_str())))
                .collect(),
            body,
            json: body.and_then(|b| serde_json::from_str(b).ok()),
            state,
        }
    }
}

handlebars_helper!(upper_helper: |value: str| value.to_uppercase());
handlebars_helper!(lower_helper: |value: str| value.to_lowercase());

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));

        // Bodies are not HTML.
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a text template against `request`.
    pub fn render(
        &self,
        template: &str,
        request: &Request,
        state: &str,
    ) -> Result<String, RenderError> {
        let ctx = TemplateContext::new(request, state);
        self.handlebars.render_template(template, &ctx)
    }

    /// Render every string leaf of `json` that contains template syntax.
    pub fn render_json(
        &self,
        json: &Value,
        request: &Request,
        state: &str,
    ) -> Result<Value, RenderError> {
        let ctx = TemplateContext::new(request, state);
        self.render_value(json, &ctx)
    }

    fn render_value(&self, value: &Value, ctx: &TemplateContext<'_>) -> Result<Value, RenderError> {
        Ok(match value {
            Value::String(s) if s.contains("{{") => {
                Value::String(self.handlebars.render_template(s, ctx)?)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render_value(v, ctx))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => {
                let mut rendered = serde_json::Map::with_capacity(fields.len());
                for (k, v) in fields {
                    rendered.insert(k.clone(), self.render_value(v, ctx)?);
                }
                Value::Object(rendered)
            }
            other => other.clone(),
        })
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// `{{default value "fallback"}}`: the fallback when value is missing, null or "".
fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");
    match h.param(0).map(|p| p.value()) {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(Value::Null) | Some(Value::String(_)) | None => out.write(fallback)?,
        Some(other) => out.write(&other.to_string())?,
    }
    Ok(())
}

/// `{{now}}` or `{{now "%Y-%m-%d"}}`, in UTC.
fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");
    let mut formatted = String::new();
    write!(formatted, "{}", chrono::Utc::now().format(format))
        .map_err(|_| RenderErrorReason::Other(format!("invalid date format '{}'", format)))?;
    out.write(&formatted)?;
    Ok(())
}

/// Random version-4 UUID.
fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    out.write(&format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))?;
    Ok(())
}
