//! Free-form per-instance option maps
//!
//! Listener and forwarder options are deliberately untyped at the config
//! layer: each component recognizes its own keys and ignores the rest.
//! The `get_as_*` helpers perform best-effort coercion so operators can
//! write `port = 4000` or `port = "4000"` interchangeably.

use std::collections::BTreeMap;

use serde::Deserialize;
use toml::Value;

/// Free-form key/value option map for one listener or forwarder instance
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, Value>);

impl Options {
    /// Create an empty option map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw value (mainly for tests and programmatic setup)
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Best-effort integer coercion
    ///
    /// Accepts integers, floats (truncated) and numeric strings.
    pub fn get_as_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key)? {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Best-effort string coercion
    ///
    /// Accepts strings, integers and floats; ports in particular are
    /// commonly written either way.
    pub fn get_as_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Best-effort string-list coercion
    ///
    /// Accepts an array of scalars, or a single comma-separated string.
    pub fn get_as_slice(&self, key: &str) -> Option<Vec<String>> {
        match self.0.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Integer(i) => Some(i.to_string()),
                        Value::Float(f) => Some(f.to_string()),
                        _ => None,
                    })
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Iterate over raw entries
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(toml: &str) -> Options {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_get_as_int_coercion() {
        let opts = options(
            r#"
a = 42
b = "42"
c = 42.9
d = "not a number"
"#,
        );
        assert_eq!(opts.get_as_int("a"), Some(42));
        assert_eq!(opts.get_as_int("b"), Some(42));
        assert_eq!(opts.get_as_int("c"), Some(42));
        assert_eq!(opts.get_as_int("d"), None);
        assert_eq!(opts.get_as_int("missing"), None);
    }

    #[test]
    fn test_get_as_str_coercion() {
        let opts = options(
            r#"
port = 19191
host = "example.com"
"#,
        );
        assert_eq!(opts.get_as_str("port").as_deref(), Some("19191"));
        assert_eq!(opts.get_as_str("host").as_deref(), Some("example.com"));
        assert_eq!(opts.get_as_str("missing"), None);
    }

    #[test]
    fn test_get_as_slice_from_array() {
        let opts = options(r#"brokers = ["a:9092", "b:9092"]"#);
        assert_eq!(
            opts.get_as_slice("brokers"),
            Some(vec!["a:9092".to_string(), "b:9092".to_string()])
        );
    }

    #[test]
    fn test_get_as_slice_from_comma_separated_string() {
        let opts = options(r#"brokers = "a:9092, b:9092""#);
        assert_eq!(
            opts.get_as_slice("brokers"),
            Some(vec!["a:9092".to_string(), "b:9092".to_string()])
        );
    }

    #[test]
    fn test_unrecognized_keys_are_preserved() {
        let opts = options(r#"whatever = true"#);
        assert!(opts.contains_key("whatever"));
    }
}
