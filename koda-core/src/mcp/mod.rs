//! MCP client subsystem: discovers external tool servers declared in
//! configuration and registers their tools and prompts.
//!
//! Server discoveries run in parallel; one failing server never aborts the
//! others. Status and OAuth-requirement maps are process-wide but written
//! only here, with explicit init and shutdown.

pub mod oauth;
pub mod schema;
pub mod tool;
pub mod transport;

pub use oauth::{AuthBrowser, McpOauthFlow, McpTokenStore, extract_www_authenticate};
pub use schema::has_valid_types;
pub use tool::DiscoveredMcpTool;
pub use transport::{RunningMcpService, TransportChoice, select_transport};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::mcp::{McpConfig, McpServerConfig};
use crate::tools::{Tool, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpServerStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    NotStarted,
    InProgress,
    Completed,
}

pub type StatusListener = Box<dyn Fn(&str, McpServerStatus) + Send + Sync>;

/// Process-wide MCP state: per-server status, OAuth requirements, and the
/// overall discovery state. Listeners fire on every status change.
#[derive(Default)]
pub struct McpRegistry {
    statuses: StdMutex<HashMap<String, McpServerStatus>>,
    requires_oauth: StdMutex<HashMap<String, bool>>,
    discovery: StdMutex<Option<DiscoveryState>>,
    listeners: StdMutex<Vec<StatusListener>>,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, server: &str) -> McpServerStatus {
        self.statuses
            .lock()
            .expect("status map poisoned")
            .get(server)
            .copied()
            .unwrap_or(McpServerStatus::Disconnected)
    }

    pub fn all_statuses(&self) -> HashMap<String, McpServerStatus> {
        self.statuses.lock().expect("status map poisoned").clone()
    }

    fn set_status(&self, server: &str, status: McpServerStatus) {
        self.statuses
            .lock()
            .expect("status map poisoned")
            .insert(server.to_string(), status);
        for listener in self.listeners.lock().expect("listeners poisoned").iter() {
            listener(server, status);
        }
    }

    pub fn requires_oauth(&self, server: &str) -> bool {
        self.requires_oauth
            .lock()
            .expect("oauth map poisoned")
            .get(server)
            .copied()
            .unwrap_or(false)
    }

    fn set_requires_oauth(&self, server: &str, value: bool) {
        self.requires_oauth
            .lock()
            .expect("oauth map poisoned")
            .insert(server.to_string(), value);
    }

    pub fn discovery_state(&self) -> DiscoveryState {
        self.discovery
            .lock()
            .expect("discovery state poisoned")
            .unwrap_or(DiscoveryState::NotStarted)
    }

    fn set_discovery_state(&self, state: DiscoveryState) {
        *self.discovery.lock().expect("discovery state poisoned") = Some(state);
    }

    pub fn add_status_listener(&self, listener: StatusListener) {
        self.listeners
            .lock()
            .expect("listeners poisoned")
            .push(listener);
    }
}

/// A prompt advertised by a server.
#[derive(Debug, Clone)]
pub struct McpPrompt {
    pub server: String,
    pub name: String,
    pub description: Option<String>,
}

struct ServerDiscovery {
    tools: Vec<DiscoveredMcpTool>,
    prompts: Vec<McpPrompt>,
}

pub struct McpClient {
    config: McpConfig,
    registry: Arc<McpRegistry>,
    oauth: Option<Arc<McpOauthFlow>>,
    connections: Mutex<HashMap<String, Arc<RunningMcpService>>>,
    prompts: StdMutex<Vec<McpPrompt>>,
}

impl McpClient {
    pub fn new(config: McpConfig, registry: Arc<McpRegistry>) -> Self {
        Self {
            config,
            registry,
            oauth: None,
            connections: Mutex::new(HashMap::new()),
            prompts: StdMutex::new(Vec::new()),
        }
    }

    /// Enable the OAuth fallback for servers that challenge with 401/403.
    pub fn with_oauth(mut self, flow: Arc<McpOauthFlow>) -> Self {
        self.oauth = Some(flow);
        self
    }

    pub fn status_registry(&self) -> Arc<McpRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn prompts(&self) -> Vec<McpPrompt> {
        self.prompts.lock().expect("prompts poisoned").clone()
    }

    /// Connect to every configured server in parallel and register the
    /// surviving tools. Failures are logged per server and never abort the
    /// whole discovery.
    pub async fn discover_and_register(&self, tool_registry: &mut ToolRegistry) -> Result<()> {
        if !self.config.enabled || self.config.servers.is_empty() {
            debug!("MCP disabled or no servers configured");
            self.registry.set_discovery_state(DiscoveryState::Completed);
            return Ok(());
        }

        self.registry.set_discovery_state(DiscoveryState::InProgress);
        info!(servers = self.config.servers.len(), "starting MCP discovery");

        let discoveries = join_all(self.config.servers.iter().map(|(name, server_config)| {
            let name = name.clone();
            async move {
                let result = self.discover_server(&name, server_config).await;
                (name, result)
            }
        }))
        .await;

        for (name, result) in discoveries {
            match result {
                Ok(discovery) => {
                    for tool in discovery.tools {
                        // Collisions with an already-registered tool get the
                        // server-prefixed name instead.
                        let tool = if tool_registry.get(tool.name()).is_some() {
                            let prefixed = format!("{name}__{}", tool.name());
                            debug!(server = name, renamed = prefixed, "tool name collision");
                            tool.renamed(prefixed)
                        } else {
                            tool
                        };
                        let tool: Arc<dyn Tool> = Arc::new(tool);
                        if let Err(err) = tool_registry.register_unique(Arc::clone(&tool)) {
                            warn!(server = name, tool = tool.name(), "{err}");
                        }
                    }
                    self.prompts
                        .lock()
                        .expect("prompts poisoned")
                        .extend(discovery.prompts);
                }
                Err(err) => {
                    warn!(server = name, "MCP discovery failed: {err:#}");
                }
            }
        }

        self.registry.set_discovery_state(DiscoveryState::Completed);
        Ok(())
    }

    async fn discover_server(
        &self,
        name: &str,
        config: &McpServerConfig,
    ) -> Result<ServerDiscovery> {
        self.registry.set_status(name, McpServerStatus::Connecting);

        let service = match transport::connect(name, config, None).await {
            Ok(service) => service,
            Err(err) => match self.try_oauth_reconnect(name, config, &err).await {
                Ok(service) => service,
                Err(err) => {
                    self.registry.set_status(name, McpServerStatus::Disconnected);
                    return Err(err);
                }
            },
        };
        let service = Arc::new(service);

        let prompts = self.discover_prompts(name, &service).await;
        let tools = self.discover_tools(name, config, &service).await;

        if prompts.is_empty() && tools.is_empty() {
            self.registry.set_status(name, McpServerStatus::Disconnected);
            return Err(anyhow!("server '{name}' exposed neither prompts nor tools"));
        }

        self.connections
            .lock()
            .await
            .insert(name.to_string(), Arc::clone(&service));
        self.registry.set_status(name, McpServerStatus::Connected);
        info!(
            server = name,
            tools = tools.len(),
            prompts = prompts.len(),
            "MCP server connected"
        );

        Ok(ServerDiscovery { tools, prompts })
    }

    /// 401/403 with a `WWW-Authenticate` challenge and OAuth enabled: run the
    /// flow, then reconnect with the bearer token.
    async fn try_oauth_reconnect(
        &self,
        name: &str,
        config: &McpServerConfig,
        original_error: &anyhow::Error,
    ) -> Result<RunningMcpService> {
        let rendered = format!("{original_error:#}");
        let Some(header) = extract_www_authenticate(&rendered) else {
            return Err(anyhow!("{rendered}"));
        };
        if !config.oauth.enabled {
            return Err(anyhow!(
                "server '{name}' requires OAuth but it is not enabled: {rendered}"
            ));
        }
        let Some(flow) = &self.oauth else {
            return Err(anyhow!("no OAuth flow configured for '{name}'"));
        };
        let Some(server_url) = config.http_url.as_deref().or(config.url.as_deref()) else {
            return Err(anyhow!("OAuth challenge from a non-HTTP server '{name}'"));
        };

        // Observed transition: CONNECTING → DISCONNECTED → CONNECTING.
        self.registry.set_status(name, McpServerStatus::Disconnected);
        self.registry.set_requires_oauth(name, true);
        info!(server = name, "MCP server requires OAuth; starting flow");

        let token = flow.authenticate(name, server_url, &header).await?;
        self.registry.set_status(name, McpServerStatus::Connecting);
        transport::connect(name, config, Some(&token)).await
    }

    async fn discover_prompts(&self, name: &str, service: &Arc<RunningMcpService>) -> Vec<McpPrompt> {
        let declares_prompts = service
            .peer_info()
            .map(|info| info.capabilities.prompts.is_some())
            .unwrap_or(false);
        if !declares_prompts {
            return Vec::new();
        }

        match service.list_prompts(Default::default()).await {
            Ok(result) => result
                .prompts
                .into_iter()
                .map(|prompt| McpPrompt {
                    server: name.to_string(),
                    name: prompt.name.to_string(),
                    description: prompt.description.map(|d| d.to_string()),
                })
                .collect(),
            Err(err) => {
                warn!(server = name, "prompts/list failed: {err}");
                Vec::new()
            }
        }
    }

    async fn discover_tools(
        &self,
        name: &str,
        config: &McpServerConfig,
        service: &Arc<RunningMcpService>,
    ) -> Vec<DiscoveredMcpTool> {
        let listed = match service.list_tools(Default::default()).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!(server = name, "tools/list failed: {err}");
                return Vec::new();
            }
        };

        let mut tools = Vec::new();
        for tool in listed.tools {
            let tool_name = tool.name.to_string();
            if !config.allows_tool(&tool_name) {
                debug!(server = name, tool = tool_name, "filtered by config");
                continue;
            }

            let parameters = serde_json::to_value(&*tool.input_schema)
                .unwrap_or(serde_json::Value::Null);
            if !has_valid_types(&parameters) {
                warn!(
                    server = name,
                    tool = tool_name,
                    "rejected: schema has nodes without type information"
                );
                continue;
            }

            tools.push(DiscoveredMcpTool::new(
                name,
                &tool_name,
                // Collisions with already-registered tools get the server
                // prefix at registration time via `registered_name`.
                tool_name.clone(),
                tool.description.unwrap_or_default().to_string(),
                parameters,
                Duration::from_millis(config.timeout_ms),
                config.trust,
                Arc::clone(service),
            ));
        }
        tools
    }

    /// Drop all connections, cancelling their service tasks.
    pub async fn shutdown(&self) {
        let mut connections = self.connections.lock().await;
        for (name, connection) in connections.drain() {
            match Arc::try_unwrap(connection) {
                Ok(service) => {
                    debug!(server = name, "cancelling MCP connection");
                    if let Err(err) = service.cancel().await {
                        debug!(server = name, "cancel join error (non-critical): {err}");
                    }
                }
                Err(_) => {
                    debug!(server = name, "connection still referenced; dropping handle");
                }
            }
            self.registry.set_status(&name, McpServerStatus::Disconnected);
        }
    }
}
