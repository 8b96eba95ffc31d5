//! Semantic XML comparison.
//!
//! Both documents are parsed with `sxd-document` and reduced to an owned
//! element tree. Comments, processing instructions and whitespace-only text
//! are dropped and text is whitespace-normalised. Children are paired by
//! element name regardless of order; attributes and text must be equal.

use crate::matcher::MatchOutcome;
use std::collections::BTreeMap;
use sxd_document::dom::{ChildOfElement, ChildOfRoot, Element};
use sxd_document::parser;

#[derive(Debug, Clone, PartialEq, Eq)]
struct XmlElement {
    name: String,
    attributes: BTreeMap<String, String>,
    text: String,
    children: Vec<XmlElement>,
}

/// Compare raw bodies.
pub fn compare_bytes(actual: &[u8], expected: &[u8]) -> MatchOutcome {
    let actual = match parse(actual) {
        Ok(root) => root,
        Err(e) => return MatchOutcome::mismatch(format!("XML parsing error: {}", e)),
    };
    let expected = match parse(expected) {
        Ok(root) => root,
        Err(e) => return MatchOutcome::mismatch(format!("XML parsing error: {}", e)),
    };

    let path = format!("/{}", expected.name);
    match compare(&actual, &expected, &path) {
        Ok(()) => MatchOutcome::Match,
        Err(diff) => MatchOutcome::mismatch(format!("XML content mismatch: {}", diff)),
    }
}

fn parse(bytes: &[u8]) -> Result<XmlElement, String> {
    let text = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
    let package = parser::parse(text).map_err(|e| format!("{:?}", e))?;
    let document = package.as_document();
    document
        .root()
        .children()
        .into_iter()
        .find_map(|child| match child {
            ChildOfRoot::Element(element) => Some(convert(element)),
            _ => None,
        })
        .ok_or_else(|| "document has no root element".to_string())
}

fn qualified_name(local: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{{{}}}{}", ns, local),
        None => local.to_string(),
    }
}

fn convert(element: Element<'_>) -> XmlElement {
    let name = element.name();
    let attributes = element
        .attributes()
        .into_iter()
        .map(|attr| {
            let attr_name = attr.name();
            (
                qualified_name(attr_name.local_part(), attr_name.namespace_uri()),
                attr.value().to_string(),
            )
        })
        .collect();

    let mut raw_text = String::new();
    let mut children = Vec::new();
    for child in element.children() {
        match child {
            ChildOfElement::Element(child) => children.push(convert(child)),
            ChildOfElement::Text(text) => {
                raw_text.push_str(text.text());
                raw_text.push(' ');
            }
            _ => {}
        }
    }

    XmlElement {
        name: qualified_name(name.local_part(), name.namespace_uri()),
        attributes,
        text: raw_text.split_whitespace().collect::<Vec<_>>().join(" "),
        children,
    }
}

fn compare(actual: &XmlElement, expected: &XmlElement, path: &str) -> Result<(), String> {
    if actual.name != expected.name {
        return Err(format!(
            "Expected element '{}' but was '{}' at {}",
            expected.name, actual.name, path
        ));
    }

    for (key, value) in &expected.attributes {
        match actual.attributes.get(key) {
            None => return Err(format!("Missing attribute '{}' at {}", key, path)),
            Some(v) if v != value => {
                return Err(format!(
                    "Expected attribute '{}' value '{}' but was '{}' at {}",
                    key, value, v, path
                ))
            }
            Some(_) => {}
        }
    }
    if let Some(extra) = actual
        .attributes
        .keys()
        .find(|k| !expected.attributes.contains_key(*k))
    {
        return Err(format!("Unexpected attribute '{}' at {}", extra, path));
    }

    if actual.text != expected.text {
        return Err(format!(
            "Expected text value '{}' but was '{}' at {}",
            expected.text, actual.text, path
        ));
    }

    let mut used = vec![false; actual.children.len()];
    for expected_child in &expected.children {
        let child_path = format!("{}/{}", path, expected_child.name);
        let candidates: Vec<usize> = (0..actual.children.len())
            .filter(|&i| !used[i] && actual.children[i].name == expected_child.name)
            .collect();

        let Some(&first) = candidates.first() else {
            return Err(format!("Missing element '{}' at {}", expected_child.name, path));
        };

        match candidates
            .iter()
            .find(|&&i| compare(&actual.children[i], expected_child, &child_path).is_ok())
        {
            Some(&i) => used[i] = true,
            // report the diff against the first unused sibling of that name
            None => return compare(&actual.children[first], expected_child, &child_path),
        }
    }

    if let Some(i) = used.iter().position(|u| !u) {
        return Err(format!(
            "Unexpected element '{}' at {}",
            actual.children[i].name, path
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(actual: &str, expected: &str) -> MatchOutcome {
        compare_bytes(actual.as_bytes(), expected.as_bytes())
    }

    #[test]
    fn test_identical_documents() {
        let xml = r#"<user id="1"><name>John</name><email>john@example.com</email></user>"#;
        assert!(check(xml, xml).is_match());
    }

    #[test]
    fn test_element_order_is_ignored() {
        let actual = "<user><email>john@example.com</email><name>John</name></user>";
        let expected = "<user><name>John</name><email>john@example.com</email></user>";
        assert!(check(actual, expected).is_match());
    }

    #[test]
    fn test_repeated_elements_pair_by_content() {
        let actual = "<list><item>b</item><item>a</item></list>";
        let expected = "<list><item>a</item><item>b</item></list>";
        assert!(check(actual, expected).is_match());
        assert!(!check("<list><item>a</item><item>a</item></list>", expected).is_match());
    }

    #[test]
    fn test_whitespace_and_comments_are_ignored() {
        let actual = r#"<?xml version="1.0"?>
            <user>
                <!-- generated -->
                <name>  John
                    Smith </name>
            </user>"#;
        let expected = "<user><name>John Smith</name></user>";
        assert!(check(actual, expected).is_match());
    }

    #[test]
    fn test_attribute_value_mismatch() {
        let outcome = check(r#"<user id="2"/>"#, r#"<user id="1"/>"#);
        assert_eq!(
            outcome.reason(),
            Some("XML content mismatch: Expected attribute 'id' value '1' but was '2' at /user")
        );
        assert!(!check(r#"<user id="1" role="x"/>"#, r#"<user id="1"/>"#).is_match());
        assert!(!check(r#"<user/>"#, r#"<user id="1"/>"#).is_match());
    }

    #[test]
    fn test_text_mismatch() {
        let outcome = check("<user><name>Jane</name></user>", "<user><name>John</name></user>");
        assert_eq!(
            outcome.reason(),
            Some("XML content mismatch: Expected text value 'John' but was 'Jane' at /user/name")
        );
    }

    #[test]
    fn test_missing_and_extra_children() {
        let outcome = check("<user/>", "<user><name>John</name></user>");
        assert_eq!(
            outcome.reason(),
            Some("XML content mismatch: Missing element 'name' at /user")
        );
        let outcome = check("<user><name>John</name><age>3</age></user>", "<user><name>John</name></user>");
        assert_eq!(
            outcome.reason(),
            Some("XML content mismatch: Unexpected element 'age' at /user")
        );
    }

    #[test]
    fn test_root_name_mismatch() {
        assert!(check("<account/>", "<user/>")
            .reason()
            .unwrap()
            .contains("Expected element 'user' but was 'account'"));
    }

    #[test]
    fn test_malformed_input() {
        assert!(check("<user>", "<user/>")
            .reason()
            .unwrap()
            .starts_with("XML parsing error"));
        assert!(check("<user/>", "not xml")
            .reason()
            .unwrap()
            .starts_with("XML parsing error"));
    }
}
