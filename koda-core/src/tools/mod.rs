//! Tool abstraction: the trait every executable tool implements, plus the
//! shared result, error and confirmation types the scheduler drives.

pub mod file_ops;
pub mod memory;
pub mod registry;
pub mod search;
pub mod shell;

pub use registry::ToolRegistry;

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::gemini::FunctionDeclaration;

/// Coarse tool category. ProceedAlways approvals are remembered per kind,
/// not per tool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Read,
    Edit,
    Execute,
    Search,
    Memory,
    Mcp,
}

/// What a tool hands back on success.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Payload included in the function response sent to the model.
    pub llm_content: Value,
    /// Optional short rendering for the UI.
    pub display: Option<String>,
}

impl ToolResult {
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            llm_content: Value::String(content.clone()),
            display: Some(content),
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorType {
    InvalidArgs,
    ExecutionFailed,
    NotFound,
    Cancelled,
}

impl ToolErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorType::InvalidArgs => "INVALID_ARGS",
            ToolErrorType::ExecutionFailed => "EXECUTION_FAILED",
            ToolErrorType::NotFound => "NOT_FOUND",
            ToolErrorType::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub error_type: ToolErrorType,
    pub message: String,
}

impl ToolError {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self {
            error_type: ToolErrorType::InvalidArgs,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            error_type: ToolErrorType::ExecutionFailed,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            error_type: ToolErrorType::Cancelled,
            message: "tool execution cancelled".to_string(),
        }
    }
}

/// What the user is asked to approve.
#[derive(Debug, Clone)]
pub enum ConfirmationDetails {
    /// A file edit; `preview` is shown to the user.
    Edit { file_path: PathBuf, preview: String },
    /// A shell invocation.
    Exec { command: String },
    /// An MCP tool on a (possibly untrusted) server.
    Mcp { server: String, tool: String },
    /// Anything else needing a yes/no.
    Info { prompt: String },
}

/// The user's answer, delivered through the scheduler.
#[derive(Debug, Clone)]
pub enum ConfirmationOutcome {
    ProceedOnce,
    /// Proceed and stop asking for this tool kind for the session.
    ProceedAlways,
    /// Proceed with arguments the user edited.
    ModifyAndProceed { args: Map<String, Value> },
    Cancel,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ToolKind;

    fn declaration(&self) -> FunctionDeclaration;

    /// None means the tool may run without asking.
    async fn should_confirm(
        &self,
        args: &Map<String, Value>,
        token: &CancellationToken,
    ) -> anyhow::Result<Option<ConfirmationDetails>>;

    async fn execute(
        &self,
        args: Map<String, Value>,
        token: CancellationToken,
    ) -> Result<ToolResult, ToolError>;
}

/// Shallow schema check: required properties present, primitive types agree.
/// This is the validation gate in front of `execute`, not a full JSON-Schema
/// validator.
pub fn validate_args_against_schema(
    schema: &Value,
    args: &Map<String, Value>,
) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(name) {
                return Err(format!("missing required argument '{name}'"));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        for (name, value) in args {
            let Some(expected) = properties
                .get(name)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" | "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!("argument '{name}' should be of type {expected}"));
            }
        }
    }

    Ok(())
}

pub(crate) fn require_str<'a>(
    args: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_args(format!("missing string argument '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_validation_checks_required_and_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "limit": {"type": "integer"},
            },
            "required": ["path"],
        });

        let ok: Map<String, Value> = serde_json::from_value(json!({"path": "a", "limit": 3}))
            .unwrap();
        assert!(validate_args_against_schema(&schema, &ok).is_ok());

        let missing: Map<String, Value> = serde_json::from_value(json!({"limit": 3})).unwrap();
        assert!(validate_args_against_schema(&schema, &missing).is_err());

        let wrong: Map<String, Value> =
            serde_json::from_value(json!({"path": 42})).unwrap();
        assert!(validate_args_against_schema(&schema, &wrong).is_err());
    }

    #[test]
    fn unknown_args_pass_through() {
        let schema = json!({"type": "object", "properties": {}});
        let args: Map<String, Value> = serde_json::from_value(json!({"extra": true})).unwrap();
        assert!(validate_args_against_schema(&schema, &args).is_ok());
    }
}
