//! Artifact admission for successful tool results.

use serde_json::Value;

/// Resource type of collection-style payloads.
pub const BUNDLE: &str = "Bundle";

/// Decide whether a successful result becomes an artifact, and with which type.
///
/// Returns `None` for scalars, error-shaped payloads (`error` truthy or
/// `status_code == 0`) and empty bundles (no entries or `total == 0`).
/// Otherwise the type is the payload's `resourceType`, `"Bundle"` when an
/// `entry` field is present, or `tool` as the last resort.
#[must_use]
pub fn admit(result: &Value, tool: &str) -> Option<String> {
    if !(result.is_object() || result.is_array()) {
        return None;
    }
    if is_error_shaped(result) {
        tracing::debug!(tool, "Skipping error-shaped result");
        return None;
    }

    let resource_type = result
        .get("resourceType")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty());

    if resource_type == Some(BUNDLE) && is_empty_bundle(result) {
        tracing::debug!(tool, "Skipping empty bundle");
        return None;
    }

    let kind = match resource_type {
        Some(t) => t.to_string(),
        None if result.get("entry").is_some_and(is_truthy) => BUNDLE.to_string(),
        None => tool.to_string(),
    };
    Some(kind)
}

fn is_error_shaped(result: &Value) -> bool {
    result.get("error").is_some_and(is_truthy)
        || result.get("status_code").and_then(Value::as_f64) == Some(0.0)
}

fn is_empty_bundle(result: &Value) -> bool {
    let no_entries = result
        .get("entry")
        .and_then(Value::as_array)
        .is_none_or(Vec::is_empty);
    let zero_total = result.get("total").and_then(Value::as_f64) == Some(0.0);
    no_entries || zero_total
}

/// Loose truthiness: null, false, zero and the empty string are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
