//! Fall-through extraction helpers for contract payloads.
//!
//! Payloads arrive in two shapes: objects already keyed by domain attribute
//! names, and generic records carrying an ordered `fields` list. The helpers
//! here absorb both, plus the known variant nestings (`{tag, value}`
//! wrappers, `{party}` / `{number}` wrappers, string-encoded numerics), so
//! each projection states only *which* fields it wants.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::decode::parse_timestamp;

/// `{tag, value}` variant split.
pub fn variant_parts(value: &Value) -> Option<(&str, &Value)> {
    let tag = value.get("tag")?.as_str()?;
    Some((tag, value.get("value").unwrap_or(&Value::Null)))
}

/// The ordered field list of a generic record, however it is nested:
/// `{fields: [...]}` or `{record: {fields: [...]}}`.
pub fn record_fields(value: &Value) -> Option<&Vec<Value>> {
    if let Some(fields) = value.get("fields").and_then(Value::as_array) {
        return Some(fields);
    }
    value
        .get("record")
        .and_then(|r| r.get("fields"))
        .and_then(Value::as_array)
}

/// Positional access into a generic record, unwrapping the per-field
/// `{label?, value}` envelope.
pub fn positional(value: &Value, index: usize) -> Option<&Value> {
    let field = record_fields(value)?.get(index)?;
    Some(field.get("value").unwrap_or(field))
}

/// Look up `key` directly, under a `value` wrapper, or as a labeled record
/// field.
pub fn get_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    if let Some(found) = value.get(key) {
        if !found.is_null() {
            return Some(found);
        }
    }
    if let Some(inner) = value.get("value")
        && let Some(found) = inner.get(key)
        && !found.is_null()
    {
        return Some(found);
    }
    record_fields(value)?.iter().find_map(|field| {
        let label = field.get("label")?.as_str()?;
        if label != key {
            return None;
        }
        let v = field.get("value").unwrap_or(field);
        (!v.is_null()).then_some(v)
    })
}

/// Dotted-path lookup through nested objects.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = get_key(current, segment)?;
    }
    Some(current)
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => {
            // Known wrappers around identifier-ish strings.
            for key in ["party", "text", "contractId", "value"] {
                if let Some(inner) = value.get(key)
                    && let Some(s) = inner.as_str()
                {
                    return Some(s.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

/// First present text among `keys`.
pub fn extract_text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text_of(get_key(value, key)?))
}

/// Party identifiers share the text nestings.
pub fn extract_party(value: &Value, keys: &[&str]) -> Option<String> {
    extract_text(value, keys)
}

fn int_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| {
            // Integer-valued decimals ("5.0") appear in older payloads.
            s.parse::<f64>().ok().and_then(|f| {
                (f.fract() == 0.0 && f.abs() < 9e15).then_some(f as i64)
            })
        }),
        Value::Object(_) => {
            // Round references arrive as {number: "42"}.
            int_of(value.get("number")?)
        }
        _ => None,
    }
}

/// First present integer among `keys`.
pub fn extract_int(value: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| int_of(get_key(value, key)?))
}

/// Integer interpretation of one value, through the known wrappers.
pub fn int_value(value: &Value) -> Option<i64> {
    int_of(value)
}

fn decimal_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        // Ledger decimals are JSON strings.
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// First present decimal among `keys`. Ledger decimals arrive as strings.
pub fn extract_decimal(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| decimal_of(get_key(value, key)?))
}

/// First present timestamp among `keys`, in any supported encoding.
pub fn extract_timestamp(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    keys.iter().find_map(|key| parse_timestamp(get_key(value, key)?))
}
