//! `search_file_content`: regex search across the workspace, honoring the
//! ignore filter.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::constants::tools;
use crate::gemini::FunctionDeclaration;
use crate::utils::ignore::{IgnoreFilter, IgnoreOptions};

use super::{ConfirmationDetails, Tool, ToolError, ToolKind, ToolResult, require_str};

const MAX_MATCHES: usize = 200;
const MAX_FILE_BYTES: u64 = 1_000_000;

pub struct GrepTool {
    workspace: PathBuf,
    ignore: IgnoreFilter,
}

impl GrepTool {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            ignore: IgnoreFilter::load(workspace),
        }
    }
}

#[derive(Debug)]
struct Match {
    path: String,
    line_number: usize,
    line: String,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        tools::GREP
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Search
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.name().to_string(),
            description: "Searches file contents with a regular expression, returning matching \
                          lines with file and line number. Ignored files are skipped."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string", "description": "Regular expression"},
                    "path": {
                        "type": "string",
                        "description": "Workspace-relative directory to search; defaults to the root",
                    },
                    "include": {
                        "type": "string",
                        "description": "Only search files whose name contains this substring",
                    },
                },
                "required": ["pattern"],
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
        token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let pattern = require_str(&args, "pattern")?;
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::invalid_args(format!("invalid pattern: {e}")))?;

        let start = match args.get("path").and_then(Value::as_str) {
            Some(sub) => self.workspace.join(sub),
            None => self.workspace.clone(),
        };
        let include = args.get("include").and_then(Value::as_str);

        let mut matches = Vec::new();
        self.search_dir(&start, &regex, include, &token, &mut matches)?;

        let truncated = matches.len() >= MAX_MATCHES;
        let rendered: Vec<Value> = matches
            .iter()
            .map(|m| {
                json!({
                    "file": m.path,
                    "line": m.line_number,
                    "text": m.line,
                })
            })
            .collect();

        let display = format!(
            "{} match(es) for /{pattern}/{}",
            matches.len(),
            if truncated { " (truncated)" } else { "" }
        );
        Ok(ToolResult {
            llm_content: json!({
                "pattern": pattern,
                "matches": rendered,
                "truncated": truncated,
            }),
            display: Some(display),
        })
    }
}

impl GrepTool {
    fn search_dir(
        &self,
        dir: &Path,
        regex: &Regex,
        include: Option<&str>,
        token: &CancellationToken,
        matches: &mut Vec<Match>,
    ) -> Result<(), ToolError> {
        if matches.len() >= MAX_MATCHES {
            return Ok(());
        }
        if token.is_cancelled() {
            return Err(ToolError::cancelled());
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| ToolError::execution(format!("cannot list {}: {e}", dir.display())))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if self.ignore.should_ignore(&path, IgnoreOptions::default()) {
                continue;
            }
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                let name = entry.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                self.search_dir(&path, regex, include, token, matches)?;
            } else if file_type.is_file() {
                if let Some(fragment) = include {
                    if !path.to_string_lossy().contains(fragment) {
                        continue;
                    }
                }
                self.search_file(&path, regex, matches);
            }
            if matches.len() >= MAX_MATCHES {
                return Ok(());
            }
        }
        Ok(())
    }

    fn search_file(&self, path: &Path, regex: &Regex, matches: &mut Vec<Match>) {
        let Ok(metadata) = std::fs::metadata(path) else {
            return;
        };
        if metadata.len() > MAX_FILE_BYTES {
            return;
        }
        let Ok(content) = std::fs::read_to_string(path) else {
            return; // binary or unreadable
        };

        let rel = path
            .strip_prefix(&self.workspace)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                matches.push(Match {
                    path: rel.clone(),
                    line_number: idx + 1,
                    line: line.trim_end().to_string(),
                });
                if matches.len() >= MAX_MATCHES {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}\nlet x = 1;\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "nothing here\n").unwrap();

        let tool = GrepTool::new(dir.path());
        let result = tool
            .execute(args(json!({"pattern": "fn \\w+"})), CancellationToken::new())
            .await
            .unwrap();
        let found = result.llm_content["matches"].as_array().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["file"], "a.rs");
        assert_eq!(found[0]["line"], 1);
    }

    #[tokio::test]
    async fn respects_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "skipped.rs\n").unwrap();
        std::fs::write(dir.path().join("skipped.rs"), "needle\n").unwrap();
        std::fs::write(dir.path().join("kept.rs"), "needle\n").unwrap();

        let tool = GrepTool::new(dir.path());
        let result = tool
            .execute(args(json!({"pattern": "needle"})), CancellationToken::new())
            .await
            .unwrap();
        let found = result.llm_content["matches"].as_array().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["file"], "kept.rs");
    }

    #[tokio::test]
    async fn rejects_invalid_regex() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GrepTool::new(dir.path());
        let err = tool
            .execute(args(json!({"pattern": "(unclosed"})), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type, super::super::ToolErrorType::InvalidArgs);
    }
}
