//! `save_memory`: appends a fact to the user-level memory file so later
//! sessions can load it into the system prompt.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::constants::tools;
use crate::config::paths;
use crate::gemini::FunctionDeclaration;

use super::{ConfirmationDetails, Tool, ToolError, ToolKind, ToolResult, require_str};

const MEMORY_FILE: &str = "KODA.md";
const MEMORY_SECTION: &str = "## Koda Added Memories";

pub struct MemoryTool {
    path: PathBuf,
}

impl MemoryTool {
    pub fn new() -> Self {
        Self {
            path: paths::app_dir().join(MEMORY_FILE),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for MemoryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        tools::MEMORY
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Memory
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: "Saves a short fact about the user or project to long-term memory. Use \
                          when the user states a stable preference or asks to be remembered."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "fact": {"type": "string", "description": "The fact to remember, one sentence"},
                },
                "required": ["fact"],
            }),
        }
    }

    async fn should_confirm(
        &self,
        _args: &Map<String, Value>,
        _token: &CancellationToken,
    ) -> anyhow::Result<Option<ConfirmationDetails>> {
        Ok(None)
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        _token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let fact = require_str(&args, "fact")?.trim();
        if fact.is_empty() {
            return Err(ToolError::invalid_args("fact must not be empty"));
        }

        let mut content = tokio::fs::read_to_string(&self.path).await.unwrap_or_default();
        if !content.contains(MEMORY_SECTION) {
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str(MEMORY_SECTION);
            content.push('\n');
        }
        if !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!("- {fact}\n"));

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::execution(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&self.path, content).await.map_err(|e| {
            ToolError::execution(format!("cannot write {}: {e}", self.path.display()))
        })?;

        Ok(ToolResult::text(format!("Remembered: {fact}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn appends_under_memory_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("KODA.md");
        let tool = MemoryTool::with_path(path.clone());

        tool.execute(args(json!({"fact": "prefers tabs"})), CancellationToken::new())
            .await
            .unwrap();
        tool.execute(args(json!({"fact": "works in UTC"})), CancellationToken::new())
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches(MEMORY_SECTION).count(), 1);
        assert!(content.contains("- prefers tabs"));
        assert!(content.contains("- works in UTC"));
    }

    #[tokio::test]
    async fn rejects_empty_fact() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MemoryTool::with_path(dir.path().join("KODA.md"));
        let err = tool
            .execute(args(json!({"fact": "  "})), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, super::super::ToolErrorType::InvalidArgs);
    }
}
