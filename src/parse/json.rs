//! JSON record extraction.
//!
//! Each JSON object becomes one [`RawRecord`]. Nulls are dropped and
//! nested values are kept as compact JSON text.

use serde_json::{Map, Value};

use super::{ParseError, RawRecord};

/// Keys that wrap a record array inside an envelope object, checked in order.
const WRAPPER_KEYS: [&str; 3] = ["records", "data", "results"];

/// Parse a JSON document into records.
///
/// Accepts a top-level array, an object wrapping an array under one of the
/// [`WRAPPER_KEYS`], or a single object. Elements that are not objects are
/// skipped.
pub fn parse(text: &str) -> Result<Vec<RawRecord>, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let value: Value = serde_json::from_str(text)?;

    let records = match value {
        Value::Array(items) => items.iter().filter_map(as_record).collect(),
        Value::Object(map) => match unwrap_envelope(&map) {
            Some(items) => items.iter().filter_map(as_record).collect(),
            None => vec![object_record(&map)],
        },
        _ => Vec::new(),
    };

    Ok(records)
}

fn unwrap_envelope(map: &Map<String, Value>) -> Option<&Vec<Value>> {
    WRAPPER_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
}

fn as_record(value: &Value) -> Option<RawRecord> {
    value.as_object().map(object_record)
}

fn object_record(map: &Map<String, Value>) -> RawRecord {
    map.iter()
        .filter_map(|(k, v)| match v {
            Value::Null => None,
            Value::String(s) => Some((k.as_str(), s.clone())),
            other => Some((k.as_str(), other.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_array() {
        let records = parse(r#"[{"title":"A","n":1},{"title":"B"},42]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("n"), Some("1"));
        assert_eq!(records[1].get("title"), Some("B"));
    }

    #[test]
    fn wrapper_keys_in_order() {
        let records =
            parse(r#"{"data":[{"x":"d"}],"records":[{"x":"r1"},{"x":"r2"}]}"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("x"), Some("r1"));

        let records = parse(r#"{"results":[{"x":"z"}]}"#).unwrap();
        assert_eq!(records[0].get("x"), Some("z"));
    }

    #[test]
    fn single_object_is_one_record() {
        let records =
            parse(r#"{"patent_number":"CA1","grant":null,"tags":["a","b"]}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("patent_number"), Some("CA1"));
        assert_eq!(records[0].get("grant"), None);
        assert_eq!(records[0].get("tags"), Some(r#"["a","b"]"#));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(parse("{not json"), Err(ParseError::Json(_))));
    }
}
