//! TOML configuration loading: workspace `koda.toml` first, then the
//! app-level copy, then built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::constants::{CONFIG_FILE_NAME, defaults, models};
use super::mcp::McpConfig;
use super::paths;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Auth kind override ("api-key", "vertex-ai", "code-assist",
    /// "openrouter"); resolved from the environment when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// Negative means unlimited.
    #[serde(default = "default_max_session_turns")]
    pub max_session_turns: i32,
    #[serde(default)]
    pub checkpointing: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            auth: None,
            max_session_turns: default_max_session_turns(),
            checkpointing: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KodaConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

fn default_model() -> String {
    models::DEFAULT_MODEL.to_string()
}

fn default_max_session_turns() -> i32 {
    defaults::MAX_SESSION_TURNS
}

pub struct ConfigManager {
    config: KodaConfig,
    source: Option<PathBuf>,
}

impl ConfigManager {
    /// Load the effective configuration for a workspace.
    pub fn load(workspace: &Path) -> Result<Self> {
        let candidates = [
            workspace.join(CONFIG_FILE_NAME),
            paths::app_dir().join(CONFIG_FILE_NAME),
        ];

        for candidate in &candidates {
            if candidate.exists() {
                let content = std::fs::read_to_string(candidate)
                    .with_context(|| format!("reading {}", candidate.display()))?;
                let config: KodaConfig = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", candidate.display()))?;
                debug!(path = %candidate.display(), "loaded configuration");
                return Ok(Self {
                    config,
                    source: Some(candidate.clone()),
                });
            }
        }

        debug!("no configuration file found, using defaults");
        Ok(Self {
            config: KodaConfig::default(),
            source: None,
        })
    }

    pub fn config(&self) -> &KodaConfig {
        &self.config
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Write the default configuration into the workspace if none exists.
    pub fn bootstrap(workspace: &Path) -> Result<PathBuf> {
        let path = workspace.join(CONFIG_FILE_NAME);
        if !path.exists() {
            let content = toml::to_string_pretty(&KodaConfig::default())
                .context("serializing default configuration")?;
            std::fs::write(&path, content)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();
        assert!(manager.source().is_none());
        assert!(manager.config().agent.max_session_turns < 0);
        assert!(!manager.config().agent.checkpointing);
    }

    #[test]
    fn workspace_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[agent]\nmodel = \"gemini-2.5-flash\"\nmax_session_turns = 5\n",
        )
        .unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();
        assert_eq!(manager.config().agent.model, "gemini-2.5-flash");
        assert_eq!(manager.config().agent.max_session_turns, 5);
    }

    #[test]
    fn mcp_servers_parse_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
[mcp.servers.files]
command = "mcp-files"
args = ["--root", "."]

[mcp.servers.remote]
url = "https://mcp.example.com/sse"
trust = true
"#,
        )
        .unwrap();
        let manager = ConfigManager::load(dir.path()).unwrap();
        let servers = &manager.config().mcp.servers;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers["files"].command.as_deref(), Some("mcp-files"));
        assert!(servers["remote"].trust);
    }

    #[test]
    fn bootstrap_writes_parseable_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = ConfigManager::bootstrap(dir.path()).unwrap();
        assert!(path.exists());
        let manager = ConfigManager::load(dir.path()).unwrap();
        assert_eq!(manager.source(), Some(path.as_path()));
    }
}
