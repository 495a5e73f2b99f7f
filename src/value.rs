//! Values emitted on the result stream.
//!
//! Everything crossing the stream is owned and `Send`: elements are
//! detached from their source document as serialised markup plus the
//! provenance triple, and strings keep the base URL of the document
//! they came from so later `url(.)` hops can resolve relative
//! references.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A string extracted from a document, carrying that document's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenancedString {
    pub value: String,
    pub base_url: Option<String>,
}

impl ProvenancedString {
    pub fn new(value: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            value: value.into(),
            base_url,
        }
    }
}

impl std::fmt::Display for ProvenancedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

/// A DOM element detached from its document.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementValue {
    /// Compact outer markup of the element.
    pub markup: String,
    /// Tag name, e.g. `div`.
    pub tag: String,
    /// Base URL of the containing document.
    pub base_url: String,
    /// URL of the page that linked to the containing document.
    pub backlink: Option<String>,
    /// Crawl depth of the containing document.
    pub depth: usize,
}

/// Error datum streamed when `yield_errors` is enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub url: String,
    pub reason: String,
    pub status: Option<u16>,
    pub depth: usize,
}

/// A value produced by evaluating a wxpath expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Element(ElementValue),
    Str(ProvenancedString),
    Number(f64),
    Bool(bool),
    /// Insertion-ordered map.
    Map(Vec<(String, Value)>),
    Array(Vec<Value>),
    Error(ErrorValue),
}

impl Value {
    pub fn string(value: impl Into<String>, base_url: Option<String>) -> Self {
        Value::Str(ProvenancedString::new(value, base_url))
    }

    /// The underlying string for string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&s.value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Elements flatten to compact markup, provenanced strings to
            // their underlying string.
            Value::Element(el) => serializer.serialize_str(&el.markup),
            Value::Str(s) => serializer.serialize_str(&s.value),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < i64::MAX as f64 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Array(items) => items.serialize(serializer),
            Value::Error(err) => {
                let len = 4 + usize::from(err.status.is_some());
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("__type__", "error")?;
                map.serialize_entry("url", &err.url)?;
                map.serialize_entry("reason", &err.reason)?;
                if let Some(status) = err.status {
                    map.serialize_entry("status", &status)?;
                }
                map.serialize_entry("depth", &err.depth)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_serialise_plain() {
        let v = Value::string("hello", Some("http://h/".to_string()));
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"hello\"");
    }

    #[test]
    fn elements_flatten_to_markup() {
        let v = Value::Element(ElementValue {
            markup: "<p>hi</p>".to_string(),
            tag: "p".to_string(),
            base_url: "http://h/".to_string(),
            backlink: None,
            depth: 0,
        });
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"<p>hi</p>\"");
    }

    #[test]
    fn maps_preserve_insertion_order() {
        let v = Value::Map(vec![
            ("t".to_string(), Value::string("x", None)),
            ("u".to_string(), Value::string("y", None)),
            ("a".to_string(), Value::Number(1.0)),
        ]);
        assert_eq!(
            serde_json::to_string(&v).unwrap(),
            r#"{"t":"x","u":"y","a":1}"#
        );
    }

    #[test]
    fn whole_numbers_serialise_without_fraction() {
        assert_eq!(serde_json::to_string(&Value::Number(3.0)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Value::Number(3.5)).unwrap(), "3.5");
    }

    #[test]
    fn error_value_shape() {
        let v = Value::Error(ErrorValue {
            url: "http://h/x".to_string(),
            reason: "disallowed by robots.txt".to_string(),
            status: None,
            depth: 1,
        });
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains(r#""__type__":"error""#));
        assert!(json.contains(r#""depth":1"#));
        assert!(!json.contains("status"));
    }
}
