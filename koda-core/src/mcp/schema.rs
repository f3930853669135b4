//! Tool-schema vetting for discovered MCP tools.

use serde_json::Value;

const COMBINATORS: [&str; 3] = ["anyOf", "allOf", "oneOf"];

/// Whether every node of the schema either declares a `type` or composes
/// valid subschemas through a non-empty `anyOf`/`allOf`/`oneOf`.
///
/// Intentionally stricter than JSON Schema itself: a `const`-only or
/// `enum`-only node fails. Tools with such schemas are rejected at discovery
/// rather than risking a backend rejection mid-turn.
pub fn has_valid_types(schema: &Value) -> bool {
    let Some(obj) = schema.as_object() else {
        // Only objects are schema nodes; anything else has nothing to check.
        return true;
    };

    let has_combinator = COMBINATORS.iter().any(|key| {
        obj.get(*key)
            .and_then(Value::as_array)
            .map(|members| !members.is_empty())
            .unwrap_or(false)
    });

    if !obj.contains_key("type") && !has_combinator {
        return false;
    }

    for key in COMBINATORS {
        if let Some(members) = obj.get(key).and_then(Value::as_array) {
            if !members.iter().all(has_valid_types) {
                return false;
            }
        }
    }

    if let Some(properties) = obj.get("properties").and_then(Value::as_object) {
        if !properties.values().all(has_valid_types) {
            return false;
        }
    }

    if let Some(items) = obj.get("items") {
        if !has_valid_types(items) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_typed_schema_is_valid() {
        assert!(has_valid_types(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
            },
        })));
    }

    #[test]
    fn missing_type_at_root_is_invalid() {
        assert!(!has_valid_types(&json!({
            "properties": {"name": {"type": "string"}},
        })));
    }

    #[test]
    fn missing_type_in_nested_property_is_invalid() {
        assert!(!has_valid_types(&json!({
            "type": "object",
            "properties": {"broken": {"description": "no type here"}},
        })));
    }

    #[test]
    fn combinator_substitutes_for_type() {
        assert!(has_valid_types(&json!({
            "anyOf": [
                {"type": "string"},
                {"type": "null"},
            ],
        })));
    }

    #[test]
    fn empty_combinator_does_not_count() {
        assert!(!has_valid_types(&json!({"anyOf": []})));
    }

    #[test]
    fn invalid_combinator_member_poisons_the_node() {
        assert!(!has_valid_types(&json!({
            "oneOf": [
                {"type": "string"},
                {"description": "typeless"},
            ],
        })));
    }

    #[test]
    fn array_items_are_checked() {
        assert!(has_valid_types(&json!({
            "type": "array",
            "items": {"type": "string"},
        })));
        assert!(!has_valid_types(&json!({
            "type": "array",
            "items": {"enum": ["a", "b"]},
        })));
    }

    #[test]
    fn const_only_nodes_are_rejected_by_design() {
        // Valid JSON Schema, but rejected here; see module docs.
        assert!(!has_valid_types(&json!({"const": 42})));
    }
}
