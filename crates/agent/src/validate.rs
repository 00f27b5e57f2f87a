//! Argument validation against a tool's parameter schema.
//!
//! Covers the subset of JSON Schema the built-ins use: an object root,
//! `required`, per-property `type` (a name or a list of names), `enum`, and
//! `additionalProperties: false`. Unknown keywords are ignored.

use serde_json::Value;

pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let object_root = schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.get("properties").is_some();
    if object_root {
        let Some(args) = arguments.as_object() else {
            return Err(format!(
                "arguments must be a JSON object, got {}",
                type_name(arguments)
            ));
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !args.contains_key(key) {
                    return Err(format!("missing required argument '{key}'"));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

        for (key, value) in args {
            match properties.and_then(|p| p.get(key)) {
                Some(spec) => check_property(key, spec, value)?,
                None if closed => return Err(format!("unexpected argument '{key}'")),
                None => {}
            }
        }
    }
    Ok(())
}

fn check_property(key: &str, spec: &Value, value: &Value) -> Result<(), String> {
    if let Some(expected) = spec.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(name) => vec![name.as_str()],
            Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(t, value)) {
            return Err(format!(
                "argument '{key}' must be {}, got {}",
                allowed.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(options) = spec.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            let listed: Vec<String> = options.iter().map(Value::to_string).collect();
            return Err(format!(
                "argument '{key}' must be one of {}",
                listed.join(", ")
            ));
        }
    }
    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
