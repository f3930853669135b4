//! MCP server configuration tables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::constants::defaults;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpConfig {
    /// Master switch; individual servers can still be disabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Server name → connection settings.
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// One configured MCP server. The populated field decides the transport:
/// `command` → stdio, `http_url` → streamable HTTP, `url` → SSE.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "httpUrl")]
    pub http_url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Trusted servers skip the per-tool confirmation step.
    #[serde(default)]
    pub trust: bool,
    #[serde(default)]
    pub oauth: McpOauthConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct McpOauthConfig {
    #[serde(default)]
    pub enabled: bool,
}

impl McpServerConfig {
    /// Whether a tool survives the include/exclude filters.
    pub fn allows_tool(&self, name: &str) -> bool {
        if let Some(exclude) = &self.exclude_tools {
            if exclude.iter().any(|t| t == name) {
                return false;
            }
        }
        match &self.include_tools {
            Some(include) => include.iter().any(|t| t == name),
            None => true,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    defaults::MCP_TOOL_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_exclude_filtering() {
        let mut config = McpServerConfig::default();
        assert!(config.allows_tool("anything"));

        config.exclude_tools = Some(vec!["dangerous".into()]);
        assert!(!config.allows_tool("dangerous"));
        assert!(config.allows_tool("safe"));

        config.include_tools = Some(vec!["safe".into()]);
        assert!(config.allows_tool("safe"));
        assert!(!config.allows_tool("other"));
    }

    #[test]
    fn timeout_defaults_to_ten_minutes() {
        let config: McpServerConfig = toml::from_str("command = \"server\"").unwrap();
        assert_eq!(config.timeout_ms, 600_000);
        assert!(!config.trust);
    }

    #[test]
    fn http_url_rename_is_respected() {
        let config: McpServerConfig =
            toml::from_str("httpUrl = \"https://example.com/mcp\"").unwrap();
        assert_eq!(config.http_url.as_deref(), Some("https://example.com/mcp"));
    }
}
