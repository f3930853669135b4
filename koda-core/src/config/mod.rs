//! Configuration: TOML tables, credential resolution, app paths.

pub mod api_keys;
pub mod constants;
pub mod loader;
pub mod mcp;
pub mod paths;

pub use loader::{AgentConfig, ConfigManager, KodaConfig};
pub use mcp::{McpConfig, McpOauthConfig, McpServerConfig};
