//! Multi-valued key matchers for headers, query parameters and form fields.

use crate::matcher::MatchOutcome;
use crate::value::{Expectation, ValueMatcher};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Key to ordered list of values. Keys are case-sensitive.
///
/// The order of values under one key is significant; key order is not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiValueMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl MultiValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `key`, keeping earlier values.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.entry(key.into()).or_default().push(value.into());
    }

    /// All values for `key`, empty when absent.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// First value under a key compared case-insensitively (header lookup).
    pub fn first_ignore_case(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Parse `key=value&key=value`, percent-decoding keys and values.
    ///
    /// `+` decodes to a space and a bare `key` maps to an empty value.
    /// Fails on percent-escapes that do not decode to UTF-8.
    pub fn parse_urlencoded(content: &str) -> Result<Self, String> {
        let mut map = Self::new();
        if content.trim().is_empty() {
            return Ok(map);
        }
        for pair in content.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.append(decode_component(key)?, decode_component(value)?);
        }
        Ok(map)
    }

    /// Lenient variant of [`parse_urlencoded`](Self::parse_urlencoded) for
    /// request targets: undecodable bytes are replaced, never rejected.
    pub fn parse_urlencoded_lossy(content: &str) -> Self {
        let mut map = Self::new();
        for pair in content.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            map.append(decode_lossy(key), decode_lossy(value));
        }
        map
    }
}

fn decode_component(raw: &str) -> Result<String, String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| format!("invalid encoding in '{}': {}", raw, e))
}

fn decode_lossy(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned()
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MultiValueMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.append(k, v);
        }
        map
    }
}

/// Set-membership matcher for headers.
///
/// Only the registered names are checked; other headers are irrelevant. Names
/// are looked up case-insensitively and an absent header is tested as `None`.
#[derive(Debug, Clone, Default)]
pub struct HeaderMatcher {
    expectations: Vec<(String, Expectation)>,
}

impl HeaderMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require header `name` to satisfy `matcher`. Replaces any earlier
    /// expectation for the same name.
    pub fn have(mut self, name: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.set(name.into(), Expectation::have(matcher));
        self
    }

    /// Require header `name` not to satisfy `matcher`.
    pub fn dont_have(mut self, name: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.set(name.into(), Expectation::dont_have(matcher));
        self
    }

    fn set(&mut self, name: String, expectation: Expectation) {
        match self
            .expectations
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = expectation,
            None => self.expectations.push((name, expectation)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.expectations.is_empty()
    }

    pub fn evaluate(&self, headers: &MultiValueMap) -> MatchOutcome {
        for (name, expectation) in &self.expectations {
            let actual = headers.first_ignore_case(name);
            if !expectation.test(actual) {
                let was = match actual {
                    Some(v) => format!("'{}'", v),
                    None => "missing".to_string(),
                };
                return MatchOutcome::mismatch(format!(
                    "Header '{}' mismatch: expected {} but was {}",
                    name, expectation, was
                ));
            }
        }
        MatchOutcome::Match
    }

    pub(crate) fn describe(&self) -> Vec<String> {
        self.expectations
            .iter()
            .map(|(name, e)| format!("header '{}' {}", name, e))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct KeyConstraint {
    exact: Option<Vec<String>>,
    checks: Vec<Expectation>,
}

impl KeyConstraint {
    /// Whether the key must be present at all.
    fn requires_presence(&self) -> bool {
        self.exact.is_some() || self.checks.iter().any(|c| !c.negate)
    }
}

/// Key-set matcher for query parameters and form fields.
///
/// Expected keys are diffed against actual keys first: a missing key always
/// fails, an unknown key fails unless unknown keys are ignored. Then each
/// constraint is checked in declaration order and the first violation is
/// reported.
#[derive(Debug, Clone)]
pub struct ParamsMatcher {
    label: &'static str,
    keys: Vec<(String, KeyConstraint)>,
    ignored: BTreeSet<String>,
    ignore_unknown: bool,
}

impl ParamsMatcher {
    /// Matcher for URL query parameters. Unknown parameters are ignored.
    pub fn query() -> Self {
        Self::labelled("Query parameter")
    }

    /// Matcher for form fields. Unknown fields are ignored.
    pub fn form() -> Self {
        Self::labelled("Form parameter")
    }

    fn labelled(label: &'static str) -> Self {
        Self {
            label,
            keys: Vec::new(),
            ignored: BTreeSet::new(),
            ignore_unknown: true,
        }
    }

    /// Build an exact-list matcher from an encoded `key=value&...` body.
    pub fn form_from_encoded(content: &str) -> Result<Self, String> {
        let parsed = MultiValueMap::parse_urlencoded(content)?;
        let mut matcher = Self::form();
        for (key, values) in parsed.iter() {
            matcher = matcher.exact(key, values.iter().cloned());
        }
        Ok(matcher)
    }

    fn constraint(&mut self, key: String) -> &mut KeyConstraint {
        let idx = match self.keys.iter().position(|(k, _)| *k == key) {
            Some(idx) => idx,
            None => {
                self.keys.push((key, KeyConstraint::default()));
                self.keys.len() - 1
            }
        };
        &mut self.keys[idx].1
    }

    /// Require at least one value of `key` to satisfy `matcher`. Repeating the
    /// key adds further requirements (`tag=a&tag=b`).
    pub fn have(mut self, key: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.constraint(key.into())
            .checks
            .push(Expectation::have(matcher));
        self
    }

    /// Require no value of `key` to satisfy `matcher`. An absent key passes.
    pub fn dont_have(mut self, key: impl Into<String>, matcher: ValueMatcher) -> Self {
        self.constraint(key.into())
            .checks
            .push(Expectation::dont_have(matcher));
        self
    }

    /// Require `key` to carry exactly these values, in order.
    pub fn exact<I, V>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.constraint(key.into()).exact = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Exclude `key` from every check: it may be present or absent with any value.
    pub fn ignore(mut self, key: impl Into<String>) -> Self {
        self.ignored.insert(key.into());
        self
    }

    /// Whether keys that were not declared are tolerated.
    pub fn ignore_unknown(mut self, ignore: bool) -> Self {
        self.ignore_unknown = ignore;
        self
    }

    /// Reject undeclared keys.
    pub fn strict(self) -> Self {
        self.ignore_unknown(false)
    }

    /// True when evaluation can never fail.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.ignore_unknown
    }

    pub fn evaluate(&self, actual: &MultiValueMap) -> MatchOutcome {
        let declared: BTreeSet<&str> = self
            .keys
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| !self.ignored.contains(*k))
            .collect();

        let missing: Vec<&str> = self
            .keys
            .iter()
            .filter(|(k, c)| {
                !self.ignored.contains(k) && c.requires_presence() && !actual.contains_key(k)
            })
            .map(|(k, _)| k.as_str())
            .collect();

        let extra: Vec<&str> = if self.ignore_unknown {
            Vec::new()
        } else {
            actual
                .keys()
                .filter(|k| !declared.contains(k) && !self.ignored.contains(*k))
                .collect()
        };

        if !missing.is_empty() || !extra.is_empty() {
            let mut details = Vec::new();
            if !missing.is_empty() {
                details.push(format!("missing: [{}]", missing.join(", ")));
            }
            if !extra.is_empty() {
                details.push(format!("extra: [{}]", extra.join(", ")));
            }
            return MatchOutcome::mismatch(format!(
                "{} keys mismatch: {}",
                self.label,
                details.join(", ")
            ));
        }

        for (key, constraint) in &self.keys {
            if self.ignored.contains(key) {
                continue;
            }
            let values = actual.get_all(key);

            if let Some(exact) = &constraint.exact {
                if exact.as_slice() != values {
                    return MatchOutcome::mismatch(format!(
                        "{} '{}' mismatch: expected {:?} but was {:?}",
                        self.label, key, exact, values
                    ));
                }
            }

            for check in &constraint.checks {
                let satisfied = if check.negate {
                    values.iter().all(|v| check.test(Some(v.as_str())))
                } else {
                    values.iter().any(|v| check.test(Some(v.as_str())))
                };
                if !satisfied {
                    return MatchOutcome::mismatch(format!(
                        "{} '{}' mismatch: expected {} but was {:?}",
                        self.label, key, check, values
                    ));
                }
            }
        }

        MatchOutcome::Match
    }

    pub(crate) fn describe(&self) -> Vec<String> {
        let kind = self.label.to_lowercase();
        let mut parts = Vec::new();
        for (key, constraint) in &self.keys {
            if self.ignored.contains(key) {
                continue;
            }
            if let Some(values) = &constraint.exact {
                parts.push(format!("{} '{}' = {:?}", kind, key, values));
            }
            for check in &constraint.checks {
                parts.push(format!("{} '{}' {}", kind, key, check));
            }
        }
        if !self.ignore_unknown {
            parts.push(format!("no other {}s", kind));
        }
        parts
    }
}

impl fmt::Display for MultiValueMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, values) in &self.entries {
            for value in values {
                if !first {
                    f.write_str("&")?;
                }
                first = false;
                write!(
                    f,
                    "{}={}",
                    urlencoding::encode(key),
                    urlencoding::encode(value)
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(s: &str) -> MultiValueMap {
        MultiValueMap::parse_urlencoded(s).unwrap()
    }

    #[test]
    fn test_parse_urlencoded() {
        let params = query("name=John%20Doe&tag=a&tag=b&flag&city=New+York");
        assert_eq!(params.first("name"), Some("John Doe"));
        assert_eq!(params.get_all("tag"), ["a", "b"]);
        assert_eq!(params.first("flag"), Some(""));
        assert_eq!(params.first("city"), Some("New York"));
        assert!(query("").is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid_utf8() {
        assert!(MultiValueMap::parse_urlencoded("a=%FF%FE").is_err());
        let lossy = MultiValueMap::parse_urlencoded_lossy("a=%FF");
        assert!(lossy.contains_key("a"));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut headers = MultiValueMap::new();
        headers.append("Authorization", "Bearer token");

        let matcher = HeaderMatcher::new().have("authorization", ValueMatcher::equal("Bearer token"));
        assert!(matcher.evaluate(&headers).is_match());
    }

    #[test]
    fn test_header_missing_and_negated() {
        let empty = MultiValueMap::new();
        let matcher = HeaderMatcher::new().have("Authorization", ValueMatcher::equal("Bearer token123"));
        let outcome = matcher.evaluate(&empty);
        assert_eq!(
            outcome.reason(),
            Some("Header 'Authorization' mismatch: expected equal to \"Bearer token123\" but was missing")
        );

        let matcher =
            HeaderMatcher::new().dont_have("Authorization", ValueMatcher::equal("Bearer token123"));
        assert!(matcher.evaluate(&empty).is_match());

        let mut headers = MultiValueMap::new();
        headers.append("Authorization", "Bearer wrong-token");
        assert!(matcher.evaluate(&headers).is_match());

        let mut headers = MultiValueMap::new();
        headers.append("Authorization", "Bearer token123");
        assert!(!matcher.evaluate(&headers).is_match());
    }

    #[test]
    fn test_other_headers_are_irrelevant() {
        let mut headers = MultiValueMap::new();
        headers.append("X-Request-Id", "req-456");
        headers.append("Accept", "*/*");
        let matcher = HeaderMatcher::new().have("X-Request-Id", ValueMatcher::not_equal("req-123"));
        assert!(matcher.evaluate(&headers).is_match());
    }

    #[test]
    fn test_query_params_order_insensitive() {
        let matcher = ParamsMatcher::query()
            .have("page", ValueMatcher::equal("1"))
            .have("limit", ValueMatcher::equal("10"));
        assert!(matcher.evaluate(&query("limit=10&page=1")).is_match());
        assert!(!matcher.evaluate(&query("page=2&limit=10")).is_match());
    }

    #[test]
    fn test_missing_key_always_fails() {
        let matcher = ParamsMatcher::query()
            .have("page", ValueMatcher::equal("1"))
            .have("limit", ValueMatcher::equal("10"));
        let outcome = matcher.evaluate(&query("page=1"));
        assert_eq!(
            outcome.reason(),
            Some("Query parameter keys mismatch: missing: [limit]")
        );
    }

    #[test]
    fn test_strict_rejects_extra_keys() {
        let matcher = ParamsMatcher::query()
            .have("page", ValueMatcher::equal("1"))
            .strict();
        let outcome = matcher.evaluate(&query("page=1&limit=10"));
        assert_eq!(
            outcome.reason(),
            Some("Query parameter keys mismatch: extra: [limit]")
        );

        let lenient = ParamsMatcher::query().have("page", ValueMatcher::equal("1"));
        assert!(lenient.evaluate(&query("page=1&limit=10")).is_match());
    }

    #[test]
    fn test_ignored_key_under_strict_mode() {
        let matcher = ParamsMatcher::query()
            .have("page", ValueMatcher::equal("1"))
            .ignore("limit")
            .strict();
        assert!(matcher.evaluate(&query("page=1&limit=10")).is_match());
        assert!(matcher.evaluate(&query("page=1")).is_match());
    }

    #[test]
    fn test_multi_value_existence() {
        let matcher = ParamsMatcher::query()
            .have("tag", ValueMatcher::equal("kotlin"))
            .have("tag", ValueMatcher::equal("java"));
        assert!(matcher.evaluate(&query("tag=kotlin&tag=java")).is_match());
        assert!(matcher.evaluate(&query("tag=java&tag=kotlin")).is_match());
        assert!(!matcher.evaluate(&query("tag=kotlin")).is_match());
    }

    #[test]
    fn test_exact_lists_are_order_sensitive() {
        let matcher = ParamsMatcher::form().exact("tag", ["a", "b"]);
        assert!(matcher.evaluate(&query("tag=a&tag=b")).is_match());
        let outcome = matcher.evaluate(&query("tag=b&tag=a"));
        assert_eq!(
            outcome.reason(),
            Some("Form parameter 'tag' mismatch: expected [\"a\", \"b\"] but was [\"b\", \"a\"]")
        );
    }

    #[test]
    fn test_dont_have_passes_when_absent() {
        let matcher = ParamsMatcher::query().dont_have("debug", ValueMatcher::equal("1"));
        assert!(matcher.evaluate(&query("page=1")).is_match());
        assert!(matcher.evaluate(&query("debug=0")).is_match());
        assert!(!matcher.evaluate(&query("debug=0&debug=1")).is_match());
    }

    #[test]
    fn test_first_violation_is_reported() {
        let matcher = ParamsMatcher::query()
            .have("b", ValueMatcher::equal("2"))
            .have("a", ValueMatcher::equal("1"));
        let outcome = matcher.evaluate(&query("a=9&b=9"));
        assert!(outcome.reason().unwrap().starts_with("Query parameter 'b' mismatch"));
    }

    #[test]
    fn test_form_from_encoded() {
        let matcher = ParamsMatcher::form_from_encoded("user=john&role=admin").unwrap();
        assert!(matcher.evaluate(&query("role=admin&user=john")).is_match());
        assert!(!matcher.evaluate(&query("user=john")).is_match());
    }

    #[test]
    fn test_display_round_trips_encoding() {
        let map: MultiValueMap = vec![("q", "hello world"), ("q", "a&b")].into_iter().collect();
        assert_eq!(map.to_string(), "q=hello%20world&q=a%26b");
    }
}
