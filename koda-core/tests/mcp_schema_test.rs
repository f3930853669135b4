//! Schema-vetting behavior for discovered MCP tools, exercised through the
//! public API with realistic tool schemas.

use koda_core::mcp::has_valid_types;
use serde_json::json;

#[test]
fn realistic_tool_schemas_pass() {
    let filesystem_tool = json!({
        "type": "object",
        "properties": {
            "path": {"type": "string", "description": "File path"},
            "recursive": {"type": "boolean", "default": false},
            "patterns": {
                "type": "array",
                "items": {"type": "string"},
            },
        },
        "required": ["path"],
    });
    assert!(has_valid_types(&filesystem_tool));

    let nullable_field = json!({
        "type": "object",
        "properties": {
            "limit": {
                "anyOf": [
                    {"type": "integer"},
                    {"type": "null"},
                ],
            },
        },
    });
    assert!(has_valid_types(&nullable_field));
}

#[test]
fn typeless_nodes_fail_wherever_they_hide() {
    // Root.
    assert!(!has_valid_types(&json!({"description": "no type"})));

    // A property.
    assert!(!has_valid_types(&json!({
        "type": "object",
        "properties": {"bad": {"description": "nope"}},
    })));

    // Array items.
    assert!(!has_valid_types(&json!({
        "type": "array",
        "items": {"description": "nope"},
    })));

    // A combinator member, deeply nested.
    assert!(!has_valid_types(&json!({
        "type": "object",
        "properties": {
            "field": {
                "allOf": [
                    {"type": "object", "properties": {"x": {"enum": [1, 2]}}},
                ],
            },
        },
    })));
}

#[test]
fn vetting_is_deterministic() {
    // The same schema always gets the same verdict, so re-running discovery
    // with identical config registers the identical tool set.
    let schema = json!({
        "type": "object",
        "properties": {"q": {"type": "string"}},
    });
    let first = has_valid_types(&schema);
    let second = has_valid_types(&schema);
    assert_eq!(first, second);
    assert!(first);
}
