//! Schema-tolerant probing of untyped lockfile and registry JSON.
//!
//! Lockfile generations disagree on field names and shapes, so every
//! optional field goes through one of these helpers. Each returns an
//! explicit absent value instead of guessing.

use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeSet;

/// Interpret a dependency entry as a metadata object.
///
/// Bare strings are the legacy `name: version` shorthand. Anything else
/// that is not an object decodes as empty metadata.
pub fn as_metadata(value: &Value) -> Cow<'_, Map<String, Value>> {
    match value {
        Value::Object(map) => Cow::Borrowed(map),
        Value::String(version) => {
            let mut map = Map::new();
            map.insert("version".to_string(), Value::String(version.clone()));
            Cow::Owned(map)
        }
        _ => Cow::Owned(Map::new()),
    }
}

/// Trimmed, non-empty string field
pub fn string_field(meta: &Map<String, Value>, key: &str) -> Option<String> {
    meta.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub fn bool_field(meta: &Map<String, Value>, key: &str) -> Option<bool> {
    meta.get(key).and_then(Value::as_bool)
}

/// Non-negative integer field; floats are truncated
pub fn u64_field(meta: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = meta.get(key)?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

/// Nested object field
pub fn object_field<'a>(meta: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    meta.get(key).and_then(Value::as_object)
}

/// Key set of an object-valued field; values are ignored
pub fn key_set(meta: &Map<String, Value>, key: &str) -> BTreeSet<String> {
    object_field(meta, key)
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default()
}

/// String array under `primary`, else under `fallback`. Non-string
/// elements and blank names are skipped.
pub fn string_array_or(meta: &Map<String, Value>, primary: &str, fallback: &str) -> BTreeSet<String> {
    let array = meta
        .get(primary)
        .and_then(Value::as_array)
        .or_else(|| meta.get(fallback).and_then(Value::as_array));

    array
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// A license declaration: `"MIT"`, `{ "type": "MIT" }`, or the legacy
/// `licenses: [{ "type": ... }]` array.
pub fn license_field(meta: &Map<String, Value>) -> Option<String> {
    let declared = match meta.get("license") {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Object(obj)) => string_field(obj, "type"),
        _ => None,
    };

    declared.filter(|s| !s.is_empty()).or_else(|| {
        meta.get("licenses")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|first| match first {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(obj) => string_field(obj, "type"),
                _ => None,
            })
            .filter(|s| !s.is_empty())
    })
}
