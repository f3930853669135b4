//! `run_shell_command`: one shell invocation in the workspace, cancellable.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::constants::tools;
use crate::gemini::FunctionDeclaration;

use super::{ConfirmationDetails, Tool, ToolError, ToolKind, ToolResult, require_str};

const MAX_OUTPUT_BYTES: usize = 200_000;

pub struct ShellTool {
    workspace: PathBuf,
}

impl ShellTool {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        tools::SHELL
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Execute
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: "Runs a shell command in the workspace and returns stdout, stderr and \
                          the exit code."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Command line to execute"},
                    "description": {
                        "type": "string",
                        "description": "Short human-readable purpose of the command",
                    },
                },
                "required": ["command"],
            }),
        }
    }

    async fn should_confirm(
        &self,
        args: &Map<String, Value>,
        _token: &CancellationToken,
    ) -> anyhow::Result<Option<ConfirmationDetails>> {
        let command = require_str(args, "command")?;
        Ok(Some(ConfirmationDetails::Exec {
            command: command.to_string(),
        }))
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let command_line = require_str(&args, "command")?;
        debug!(command = command_line, "running shell command");

        let child = Command::new("bash")
            .arg("-c")
            .arg(command_line)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::execution(format!("failed to spawn shell: {e}")))?;

        // kill_on_drop reaps the child when the cancelled branch drops the
        // wait future.
        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.map_err(|e| ToolError::execution(format!("wait failed: {e}")))?
            }
            _ = token.cancelled() => {
                return Err(ToolError::cancelled());
            }
        };

        let stdout = truncate_output(&output.stdout);
        let stderr = truncate_output(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        let payload = json!({
            "command": command_line,
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        });

        let display = if stdout.is_empty() && stderr.is_empty() {
            format!("exit {exit_code}")
        } else if stderr.is_empty() {
            stdout.clone()
        } else {
            format!("{stdout}\n{stderr}")
        };

        Ok(ToolResult {
            llm_content: payload,
            display: Some(display.trim_end().to_string()),
        })
    }
}

fn truncate_output(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[output truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn args(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path());
        let result = tool
            .execute(
                args(json!({"command": "echo hello && exit 3"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.llm_content["exit_code"], 3);
        assert_eq!(result.llm_content["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path());
        let token = CancellationToken::new();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = tool
            .execute(args(json!({"command": "sleep 30"})), token)
            .await
            .unwrap_err();
        assert_eq!(err.error_type, super::super::ToolErrorType::Cancelled);
    }

    #[tokio::test]
    async fn always_asks_for_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path());
        let confirmation = tool
            .should_confirm(&args(json!({"command": "rm -rf build"})), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(confirmation, Some(ConfirmationDetails::Exec { .. })));
    }
}
