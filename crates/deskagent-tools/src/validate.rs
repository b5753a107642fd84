//! Argument validation against a tool's JSON-Schema `properties`/`required`.
//!
//! Only the checks the loop can act on are performed: presence of required
//! fields and coarse type agreement. Anything subtler is the handler's
//! problem; the whole point is that the model may emit anything.

use serde_json::Value;

use crate::catalog::ToolDefinition;

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Check `args` against the definition's schema. `Err` carries a hint the
/// loop feeds back to the model.
pub fn validate_args(definition: &ToolDefinition, args: &Value) -> Result<(), String> {
    let Some(object) = args.as_object() else {
        return Err(format!(
            "Arguments for '{}' must be a JSON object, got {}",
            definition.name,
            json_type_name(args)
        ));
    };

    let schema = &definition.parameters;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            let present = object
                .get(field)
                .map(|value| !value.is_null())
                .unwrap_or(false);
            if !present {
                return Err(format!(
                    "Missing required parameter '{field}' for tool '{}'",
                    definition.name
                ));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, value) in object {
            let Some(property) = properties.get(field) else {
                continue;
            };
            let Some(expected) = property.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(format!(
                    "Parameter '{field}' of tool '{}' must be of type {expected}, got {}",
                    definition.name,
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> ToolDefinition {
        ToolDefinition {
            name: "write_file".to_string(),
            description: String::new(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "mode": { "type": "integer" }
                },
                "required": ["path", "content"]
            }),
            group: "file".to_string(),
            requires_approval: true,
        }
    }

    #[test]
    fn accepts_well_formed_arguments() {
        let args = json!({ "path": "a.txt", "content": "hi", "tags": ["x"], "mode": 420 });
        assert!(validate_args(&definition(), &args).is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let args = json!({ "path": "a.txt" });
        let hint = validate_args(&definition(), &args).unwrap_err();
        assert!(hint.contains("content"));
        assert!(hint.contains("write_file"));
    }

    #[test]
    fn null_counts_as_missing() {
        let args = json!({ "path": "a.txt", "content": null });
        assert!(validate_args(&definition(), &args).is_err());
    }

    #[test]
    fn rejects_scalar_where_array_expected() {
        let args = json!({ "path": "a.txt", "content": "hi", "tags": "not-a-list" });
        let hint = validate_args(&definition(), &args).unwrap_err();
        assert!(hint.contains("array"));
    }

    #[test]
    fn rejects_float_where_integer_expected() {
        let args = json!({ "path": "a.txt", "content": "hi", "mode": 4.2 });
        let hint = validate_args(&definition(), &args).unwrap_err();
        assert!(hint.contains("integer"));
    }

    #[test]
    fn rejects_non_object_arguments() {
        let hint = validate_args(&definition(), &json!(["a"])).unwrap_err();
        assert!(hint.contains("JSON object"));
    }

    #[test]
    fn unknown_fields_pass_through() {
        let args = json!({ "path": "a.txt", "content": "hi", "extra": 1 });
        assert!(validate_args(&definition(), &args).is_ok());
    }
}
