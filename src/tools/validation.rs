//! Validate tool call arguments against JSON Schema before execution.

use super::arguments::parse_bool;

/// Validate `args` for `tool_name` against a JSON Schema.
///
/// Checks the top-level type, required field presence and property types. Numbers and
/// booleans may be spelled as strings since tag attributes are always text. Returns the
/// first violation found.
pub fn validate_arguments(
    tool_name: &str,
    args: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), String> {
    if let Some(schema_type) = schema.get("type").and_then(|v| v.as_str()) {
        if schema_type == "object" && !args.is_object() {
            return Err(format!(
                "Invalid arguments for tool '{tool_name}': expected object, got {}",
                json_type_name(args)
            ));
        }
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|f| f.as_str()) {
            if obj.get(name).map_or(true, |v| v.is_null()) {
                return Err(format!(
                    "Missing required parameter '{name}' for tool '{tool_name}'"
                ));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in obj {
            let expected = properties
                .get(key)
                .and_then(|p| p.get("type"))
                .and_then(|t| t.as_str());
            if let Some(expected) = expected {
                if !value_matches_type(value, expected) {
                    return Err(format!(
                        "Parameter '{key}' for tool '{tool_name}' expected type '{expected}', got {}",
                        json_type_name(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &serde_json::Value, expected: &str) -> bool {
    match (expected, value) {
        ("string", v) => v.is_string(),
        ("number", serde_json::Value::String(s)) => s.trim().parse::<f64>().is_ok(),
        ("number", v) => v.is_number(),
        ("integer", serde_json::Value::String(s)) => s.trim().parse::<i64>().is_ok(),
        ("integer", v) => v.is_i64() || v.is_u64(),
        ("boolean", serde_json::Value::String(s)) => parse_bool(s).is_some(),
        ("boolean", v) => v.is_boolean(),
        ("object", v) => v.is_object(),
        ("array", v) => v.is_array(),
        ("null", v) => v.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
