//! Log record representation for the shipping pipeline.
//!
//! A [`LogRecord`] is an already-flattened map of string keys to JSON values.
//! The formatting layer builds it; once handed to the shipper it is never
//! mutated again. [`DeliveryTag`] correlates a queued record with the socket
//! write that carries it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flattened key/value payload of a single log event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRecord {
    fields: Map<String, Value>,
}

impl LogRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Borrow the underlying JSON map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the record and return the underlying JSON map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for LogRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for LogRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Correlation id attached to every queued record.
///
/// Tags are handed out by the dispatch worker from a strictly increasing
/// counter, so ascending tag order is enqueue order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

impl DeliveryTag {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for DeliveryTag {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_serialises_as_plain_object() {
        let record = LogRecord::new().with("message", "hi").with("line", 3);
        let text = serde_json::to_string(&record).expect("serialise record");
        let value: Value = serde_json::from_str(&text).expect("parse record");
        assert_eq!(value, json!({"message": "hi", "line": 3}));
    }

    #[test]
    fn insert_replaces_existing_value() {
        let mut record = LogRecord::new().with("k", "a");
        let previous = record.insert("k", "b");
        assert_eq!(previous, Some(json!("a")));
        assert_eq!(record.get("k"), Some(&json!("b")));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn tags_order_numerically() {
        assert!(DeliveryTag(100) < DeliveryTag(200));
        assert_eq!(DeliveryTag::from(7).to_string(), "#7");
    }
}
