//! Lenient field extraction over untyped JSON
//!
//! Every probe takes a list of candidate keys and coerces whatever it finds
//! to a safe default instead of failing.

use serde_json::{Map, Value};

pub(crate) type Object = Map<String, Value>;

/// First candidate key present on the object
fn probe<'a>(obj: &'a Object, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// String field, numbers rendered as text, anything else empty
pub(crate) fn text(obj: &Object, keys: &[&str]) -> String {
    match probe(obj, keys) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Non-empty text, for fields that identify the event shape
pub(crate) fn required_text(obj: &Object, keys: &[&str]) -> Option<String> {
    let value = text(obj, keys);
    (!value.trim().is_empty()).then_some(value)
}

/// Unsigned integer from a number or a numeric string
pub(crate) fn uint(obj: &Object, keys: &[&str]) -> Option<u64> {
    match probe(obj, keys)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// Count of gifts, at least 1
pub(crate) fn count(obj: &Object, keys: &[&str]) -> u32 {
    uint(obj, keys)
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(1)
        .max(1)
}

/// Nested object under the first matching key
pub(crate) fn object<'a>(obj: &'a Object, keys: &[&str]) -> Option<&'a Object> {
    probe(obj, keys).and_then(Value::as_object)
}

/// Nested object, or a string holding a JSON-encoded object (one extra parse)
pub(crate) fn embedded_object(obj: &Object, key: &str) -> Option<Object> {
    match obj.get(key)? {
        Value::Object(map) => Some(map.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}
