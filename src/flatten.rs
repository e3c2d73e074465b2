//! Flattening of nested JSON log payloads.
//!
//! Collectors index flat documents, so nested objects are merged into the
//! top level before a record is queued. Arrays cannot be merged and are kept
//! as their compact JSON text.

use serde_json::{Map, Value};

use crate::record::LogRecord;

/// Key under which the shipping token is stored in every record.
pub const TOKEN_KEY: &str = "token";

/// Flatten `object` into a single-level map.
///
/// Nested objects are merged recursively without a key prefix. When two
/// levels share a key the value seen later in iteration order wins.
pub fn flatten(object: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(object, &mut out);
    out
}

fn flatten_into(object: Map<String, Value>, out: &mut Map<String, Value>) {
    for (key, value) in object {
        match value {
            Value::Object(inner) => flatten_into(inner, out),
            Value::Array(items) => {
                let text = Value::Array(items).to_string();
                out.insert(key, Value::String(text));
            }
            scalar => {
                out.insert(key, scalar);
            }
        }
    }
}

/// Flatten `object` and merge the optional shipping `token` into it.
pub fn prepare_record(object: Map<String, Value>, token: Option<&str>) -> LogRecord {
    let mut flat = flatten(object);
    if let Some(token) = token {
        flat.insert(TOKEN_KEY.to_owned(), Value::String(token.to_owned()));
    }
    LogRecord::from(flat)
}

/// Parse a JSON document and prepare it for shipping.
///
/// Returns `None` when `text` is not a JSON object.
pub fn parse_record(text: &str, token: Option<&str>) -> Option<LogRecord> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(object) => Some(prepare_record(object, token)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[rstest]
    fn nested_objects_merge_into_top_level() {
        let flat = flatten(object(json!({
            "message": "hello",
            "metadata": {"file": "main.rs", "line": "10"},
            "user_info": {"log_type": "info", "nested": {"deep": true}},
        })));
        assert_eq!(flat.get("message"), Some(&json!("hello")));
        assert_eq!(flat.get("file"), Some(&json!("main.rs")));
        assert_eq!(flat.get("log_type"), Some(&json!("info")));
        assert_eq!(flat.get("deep"), Some(&json!(true)));
        assert!(flat.get("metadata").is_none());
    }

    #[rstest]
    fn arrays_become_json_text() {
        let flat = flatten(object(json!({"errors": [{"code": 1}]})));
        assert_eq!(flat.get("errors"), Some(&json!("[{\"code\":1}]")));
    }

    #[rstest]
    #[case(Some("secret"), Some(json!("secret")))]
    #[case(None, None)]
    fn token_is_merged_when_configured(#[case] token: Option<&str>, #[case] expected: Option<Value>) {
        let record = prepare_record(object(json!({"message": "m"})), token);
        assert_eq!(record.get(TOKEN_KEY).cloned(), expected);
    }

    #[rstest]
    fn token_overrides_payload_field() {
        let record = prepare_record(object(json!({"token": "spoofed"})), Some("real"));
        assert_eq!(record.get(TOKEN_KEY), Some(&json!("real")));
    }

    #[rstest]
    #[case("[1, 2]")]
    #[case("\"text\"")]
    #[case("not json")]
    fn non_objects_are_rejected(#[case] text: &str) {
        assert!(parse_record(text, None).is_none());
    }

    #[rstest]
    fn parse_record_flattens() {
        let record = parse_record(r#"{"a": {"b": 1}}"#, None).expect("object parses");
        assert_eq!(record.get("b"), Some(&json!(1)));
    }
}
