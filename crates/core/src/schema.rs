//! Argument validation against a JSON-Schema-like tool schema.
//!
//! Only the subset of JSON Schema that tool manifests actually use is
//! checked: `type`, `required`, `properties`, `items`, and `enum`.
//! Unknown keywords are ignored rather than rejected.

use serde_json::Value;

/// Validate tool arguments against a schema.
///
/// Returns `Ok(())` when valid, or `Err(message)` describing the first
/// violation found. Paths in the message use dotted notation
/// (`filters.limit`, `items[2]`).
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    validate_at(args, schema, "")
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str)
        && !value_matches_type(value, expected)
    {
        return Err(format!(
            "{} expected type '{}', got {}",
            describe_path(path),
            expected,
            json_type_name(value)
        ));
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array)
        && !allowed.contains(value)
    {
        return Err(format!(
            "{} must be one of {}",
            describe_path(path),
            Value::Array(allowed.clone())
        ));
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !obj.contains_key(name) {
                    return Err(format!("missing required field '{}'", join(path, name)));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, field) in obj {
                if let Some(field_schema) = properties.get(key) {
                    validate_at(field, field_schema, &join(path, key))?;
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item, item_schema, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn describe_path(path: &str) -> String {
    if path.is_empty() {
        "arguments".into()
    } else {
        format!("field '{path}'")
    }
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
