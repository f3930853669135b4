//! Checkpoint snapshots: a restorable bundle written before a destructive
//! tool runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::gemini::Content;

/// Everything needed to restore conversation and file state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointBundle {
    pub history: Vec<Content>,
    /// UI-side history items, opaque to the core.
    pub client_history: Vec<Value>,
    pub tool_call: CheckpointToolCall,
    pub commit_hash: Option<String>,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointToolCall {
    pub name: String,
    pub args: Value,
}

pub struct CheckpointStore {
    dir: PathBuf,
    workspace: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf, workspace: PathBuf) -> Self {
        Self { dir, workspace }
    }

    /// Write a checkpoint named `<timestamp>-<basename>-<toolName>.json`.
    pub async fn save(&self, bundle: &CheckpointBundle) -> Result<PathBuf> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
        let basename = bundle
            .file_path
            .as_deref()
            .map(|p| {
                Path::new(p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unknown".to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        let file_name = format!("{timestamp}-{basename}-{}.json", bundle.tool_call.name);
        let path = self.dir.join(file_name);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating checkpoint dir {}", self.dir.display()))?;
        let payload =
            serde_json::to_string_pretty(bundle).context("serializing checkpoint bundle")?;
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("writing checkpoint {}", path.display()))?;

        debug!(path = %path.display(), "wrote checkpoint");
        Ok(path)
    }

    /// Best-effort HEAD hash of the workspace; None outside a git checkout.
    pub async fn current_commit_hash(&self) -> Option<String> {
        let output = tokio::process::Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.workspace)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!hash.is_empty()).then_some(hash)
    }

    pub async fn load(&self, path: &Path) -> Result<CheckpointBundle> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading checkpoint {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

/// Scheduler hook that snapshots the session when a restorable tool parks
/// for approval. Holds only a read-only history accessor, never the session.
pub struct SessionCheckpointHook {
    store: std::sync::Arc<CheckpointStore>,
    history: crate::core::session::HistoryAccessor,
}

impl SessionCheckpointHook {
    pub fn new(
        store: std::sync::Arc<CheckpointStore>,
        history: crate::core::session::HistoryAccessor,
    ) -> Self {
        Self { store, history }
    }
}

#[async_trait::async_trait]
impl crate::core::scheduler::CheckpointHook for SessionCheckpointHook {
    async fn snapshot(
        &self,
        call: &crate::core::events::ToolCallRequestInfo,
        file_path: Option<String>,
    ) {
        let commit_hash = self.store.current_commit_hash().await;
        let bundle = CheckpointBundle {
            history: self.history.snapshot(),
            client_history: Vec::new(),
            tool_call: CheckpointToolCall {
                name: call.name.clone(),
                args: Value::Object(call.args.clone()),
            },
            commit_hash,
            file_path,
        };
        if let Err(err) = self.store.save(&bundle).await {
            tracing::warn!("failed to write checkpoint: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_and_load_roundtrip_with_expected_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints"), dir.path().to_path_buf());

        let bundle = CheckpointBundle {
            history: vec![Content::user_text("write it")],
            client_history: vec![json!({"type": "user", "text": "write it"})],
            tool_call: CheckpointToolCall {
                name: "write_file".into(),
                args: json!({"path": "src/lib.rs"}),
            },
            commit_hash: Some("abc123".into()),
            file_path: Some("src/lib.rs".into()),
        };

        let path = store.save(&bundle).await.unwrap();
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.ends_with("-lib.rs-write_file.json"), "bad name: {name}");

        let loaded = store.load(&path).await.unwrap();
        assert_eq!(loaded.history.len(), 1);
        assert_eq!(loaded.tool_call.name, "write_file");
        assert_eq!(loaded.commit_hash.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn missing_file_path_uses_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp"), dir.path().to_path_buf());
        let bundle = CheckpointBundle {
            history: vec![],
            client_history: vec![],
            tool_call: CheckpointToolCall {
                name: "replace".into(),
                args: json!({}),
            },
            commit_hash: None,
            file_path: None,
        };
        let path = store.save(&bundle).await.unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("-unknown-replace.json"));
    }
}
