//! Request snapshots fed to the dispatcher.

use crate::params::MultiValueMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "TRACE" => Ok(Method::Trace),
            "CONNECT" => Ok(Method::Connect),
            other => Err(format!("unknown HTTP method '{}'", other)),
        }
    }
}

/// An inbound request as seen by the double.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    /// Encoded path, without the query string.
    pub path: String,
    /// Decoded query parameters.
    pub query: MultiValueMap,
    pub headers: MultiValueMap,
    pub body: Vec<u8>,
}

impl Request {
    /// Create a request from a target such as `/api/users?page=1`.
    ///
    /// A scheme and authority, if present, are stripped.
    pub fn new(method: Method, target: &str) -> Self {
        let target = strip_authority(target);
        let target = target.split_once('#').map_or(target, |(t, _)| t);
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, MultiValueMap::parse_urlencoded_lossy(query)),
            None => (target, MultiValueMap::new()),
        };
        let path = if path.is_empty() { "/" } else { path };

        Self {
            method,
            path: path.to_string(),
            query,
            headers: MultiValueMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::Post, target)
    }

    pub fn put(target: &str) -> Self {
        Self::new(Method::Put, target)
    }

    pub fn delete(target: &str) -> Self {
        Self::new(Method::Delete, target)
    }

    pub fn patch(target: &str) -> Self {
        Self::new(Method::Patch, target)
    }

    pub fn head(target: &str) -> Self {
        Self::new(Method::Head, target)
    }

    /// Add a header value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the raw body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a plain-text body with its content type.
    pub fn text(self, body: impl Into<String>) -> Self {
        self.header("Content-Type", "text/plain")
            .body(body.into().into_bytes())
    }

    /// Set a JSON body with its content type.
    pub fn json(self, body: &serde_json::Value) -> Self {
        self.header("Content-Type", "application/json")
            .body(body.to_string().into_bytes())
    }

    /// Set a form-encoded body with its content type.
    pub fn form<K, V>(self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let form: MultiValueMap = fields.into_iter().collect();
        self.header("Content-Type", "application/x-www-form-urlencoded")
            .body(form.to_string().into_bytes())
    }

    /// The `Content-Type` header, looked up case-insensitively.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.first_ignore_case("content-type")
    }

    /// The body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

fn strip_authority(target: &str) -> &str {
    match target.find("://") {
        Some(idx) => {
            let rest = &target[idx + 3..];
            match rest.find(|c: char| c == '/' || c == '?') {
                Some(start) => &rest[start..],
                None => "",
            }
        }
        None => target,
    }
}
