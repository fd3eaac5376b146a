//! Flattened view of a JSON document.
//!
//! Backend documents are deeply nested. Flattening them into dotted paths
//! keeps field extraction to a single lookup:
//!
//! ```text
//! { "user": { "name": "Frank", "age": 42 } }
//! ```
//!
//! becomes the keys `user.name` and `user.age`. Arrays are kept as leaf
//! values.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::ProtocolError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: HashMap<String, Value>,
}

impl Document {
    /// Parse and flatten a JSON object.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(map) => Ok(Self::from_object(map)),
            _ => Err(ProtocolError::NotAnObject),
        }
    }

    pub fn from_object(nested: Map<String, Value>) -> Self {
        let mut doc = Self::default();
        doc.flatten(nested, "");
        doc
    }

    fn flatten(&mut self, nested: Map<String, Value>, prefix: &str) {
        for (key, value) in nested {
            let long_key = if prefix.is_empty() {
                key
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                Value::Object(inner) => self.flatten(inner, &long_key),
                leaf => {
                    self.fields.insert(long_key, leaf);
                }
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.fields.get(path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path)?.as_str()
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }

    /// Integers may arrive as JSON numbers or, for 64-bit ids, as decimal
    /// strings.
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// The `@type` tag every backend document carries.
    pub fn kind(&self) -> Option<&str> {
        self.get_str("@type")
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flattens_nested_objects() {
        let doc = Document::parse(r#"{"user": {"name": "Frank", "age": 42, "tags": [1, 2]}}"#)
            .unwrap();
        assert_eq!(doc.len(), 3);
        assert_eq!(doc.get_str("user.name"), Some("Frank"));
        assert_eq!(doc.get_i64("user.age"), Some(42));
        assert!(doc.get("user.tags").unwrap().is_array());
        assert!(doc.get("user").is_none());
    }

    #[test]
    fn test_type_mismatch_is_none() {
        let doc = Document::parse(r#"{"a": "x", "b": true, "c": 1.5, "d": "77"}"#).unwrap();
        assert_eq!(doc.get_i64("a"), None);
        assert_eq!(doc.get_str("b"), None);
        assert_eq!(doc.get_bool("b"), Some(true));
        assert_eq!(doc.get_i64("c"), Some(1));
        assert_eq!(doc.get_i64("d"), Some(77));
        assert_eq!(doc.get_bool("missing"), None);
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(matches!(
            Document::parse("[1, 2]"),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(matches!(
            Document::parse("{"),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
