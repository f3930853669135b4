//! Workspace file tools: `read_file`, `write_file`, `replace`.
//!
//! All paths are resolved against the workspace root and may not escape it.
//! The two mutating tools ask for confirmation with a preview and are the
//! checkpoint-triggering ("restorable") tools.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::constants::tools;
use crate::gemini::FunctionDeclaration;

use super::{
    ConfirmationDetails, Tool, ToolError, ToolKind, ToolResult, require_str,
};

const MAX_READ_BYTES: u64 = 1_000_000;
const PREVIEW_LINES: usize = 12;

/// Join `relative` onto `workspace`, rejecting absolute paths and `..`
/// escapes.
fn resolve_workspace_path(workspace: &Path, relative: &str) -> Result<PathBuf, ToolError> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(ToolError::invalid_args(format!(
            "path must be relative to the workspace: {relative}"
        )));
    }
    let mut resolved = workspace.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ToolError::invalid_args(format!(
                    "path may not leave the workspace: {relative}"
                )));
            }
        }
    }
    Ok(resolved)
}

fn content_preview(content: &str) -> String {
    let mut preview: Vec<&str> = content.lines().take(PREVIEW_LINES).collect();
    let total = content.lines().count();
    if total > PREVIEW_LINES {
        preview.push("…");
    }
    preview.join("\n")
}

pub struct ReadFileTool {
    workspace: PathBuf,
}

impl ReadFileTool {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        tools::READ_FILE
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: "Reads a file from the workspace. Large files can be paged with \
                          offset/limit expressed in lines."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "offset": {"type": "integer", "description": "First line to read (0-based)"},
                    "limit": {"type": "integer", "description": "Maximum number of lines"},
                },
                "required": ["path"],
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
        let path = resolve_workspace_path(&self.workspace, require_str(&args, "path")?)?;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::execution(format!("cannot stat {}: {e}", path.display())))?;
        if metadata.len() > MAX_READ_BYTES {
            return Err(ToolError::execution(format!(
                "{} is too large to read whole ({} bytes)",
                path.display(),
                metadata.len()
            )));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::execution(format!("cannot read {}: {e}", path.display())))?;

        let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = args.get("limit").and_then(Value::as_u64).map(|l| l as usize);

        let selected: String = match limit {
            Some(limit) => content
                .lines()
                .skip(offset)
                .take(limit)
                .collect::<Vec<_>>()
                .join("\n"),
            None if offset > 0 => content.lines().skip(offset).collect::<Vec<_>>().join("\n"),
            None => content,
        };

        Ok(ToolResult {
            llm_content: Value::String(selected),
            display: Some(format!("Read {}", path.display())),
        })
    }
}

pub struct WriteFileTool {
    workspace: PathBuf,
}

impl WriteFileTool {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        tools::WRITE_FILE
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: "Writes content to a workspace file, creating parent directories and \
                          overwriting any existing content."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "content": {"type": "string", "description": "Full new file content"},
                },
                "required": ["path", "content"],
            }),
        }
    }

    async fn should_confirm(
        &self,
        args: &Map<String, Value>,
        _token: &CancellationToken,
    ) -> anyhow::Result<Option<ConfirmationDetails>> {
        let path = resolve_workspace_path(&self.workspace, require_str(args, "path")?)?;
        let content = require_str(args, "content")?;
        Ok(Some(ConfirmationDetails::Edit {
            file_path: path,
            preview: content_preview(content),
        }))
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        _token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let path = resolve_workspace_path(&self.workspace, require_str(&args, "path")?)?;
        let content = require_str(&args, "content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::execution(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::execution(format!("cannot write {}: {e}", path.display())))?;

        Ok(ToolResult::text(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path.display()
        )))
    }
}

pub struct ReplaceTool {
    workspace: PathBuf,
}

impl ReplaceTool {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ReplaceTool {
    fn name(&self) -> &str {
        tools::REPLACE
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: "Replaces an exact text occurrence in a workspace file. The old text \
                          must match exactly the expected number of times."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative file path"},
                    "old_string": {"type": "string", "description": "Exact text to replace"},
                    "new_string": {"type": "string", "description": "Replacement text"},
                    "expected_replacements": {
                        "type": "integer",
                        "description": "Occurrences expected; defaults to 1",
                    },
                },
                "required": ["path", "old_string", "new_string"],
            }),
        }
    }

    async fn should_confirm(
        &self,
        args: &Map<String, Value>,
        _token: &CancellationToken,
    ) -> anyhow::Result<Option<ConfirmationDetails>> {
        let path = resolve_workspace_path(&self.workspace, require_str(args, "path")?)?;
        let old_string = require_str(args, "old_string")?;
        let new_string = require_str(args, "new_string")?;
        Ok(Some(ConfirmationDetails::Edit {
            file_path: path,
            preview: format!(
                "- {}\n+ {}",
                content_preview(old_string),
                content_preview(new_string)
            ),
        }))
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        _token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let path = resolve_workspace_path(&self.workspace, require_str(&args, "path")?)?;
        let old_string = require_str(&args, "old_string")?;
        let new_string = require_str(&args, "new_string")?;
        let expected = args
            .get("expected_replacements")
            .and_then(Value::as_u64)
            .unwrap_or(1) as usize;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::execution(format!("cannot read {}: {e}", path.display())))?;

        let occurrences = content.matches(old_string).count();
        if occurrences != expected {
            return Err(ToolError::execution(format!(
                "expected {expected} occurrence(s) of the target text in {}, found {occurrences}",
                path.display()
            )));
        }

        let updated = content.replace(old_string, new_string);
        tokio::fs::write(&path, updated)
            .await
            .map_err(|e| ToolError::execution(format!("cannot write {}: {e}", path.display())))?;

        Ok(ToolResult::text(format!(
            "Replaced {occurrences} occurrence(s) in {}",
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn read_respects_offset_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a\nb\nc\nd\n").unwrap();
        let tool = ReadFileTool::new(dir.path());

        let result = tool
            .execute(
                args(json!({"path": "f.txt", "offset": 1, "limit": 2})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.llm_content, Value::String("b\nc".into()));
    }

    #[tokio::test]
    async fn paths_cannot_escape_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadFileTool::new(dir.path());
        let err = tool
            .execute(args(json!({"path": "../etc/passwd"})), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, super::super::ToolErrorType::InvalidArgs);
    }

    #[tokio::test]
    async fn write_creates_parents_and_confirms_with_preview() {
        let dir = tempfile::tempdir().unwrap();
        let tool = WriteFileTool::new(dir.path());
        let call_args = args(json!({"path": "sub/out.txt", "content": "hello"}));

        let confirmation = tool
            .should_confirm(&call_args, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(
            confirmation,
            Some(ConfirmationDetails::Edit { .. })
        ));

        tool.execute(call_args, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sub/out.txt")).unwrap(),
            "hello"
        );
    }

    #[tokio::test]
    async fn replace_enforces_occurrence_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "x xx x").unwrap();
        let tool = ReplaceTool::new(dir.path());

        let err = tool
            .execute(
                args(json!({"path": "f.txt", "old_string": "x", "new_string": "y"})),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.message.contains("found 4"));

        tool.execute(
            args(json!({
                "path": "f.txt",
                "old_string": "xx",
                "new_string": "y",
                "expected_replacements": 1,
            })),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "x y x"
        );
    }
}
