//! A discovered MCP tool wrapped as a registry [`Tool`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::gemini::FunctionDeclaration;
use crate::tools::{
    ConfirmationDetails, Tool, ToolError, ToolKind, ToolResult,
};

use super::transport::RunningMcpService;

pub struct DiscoveredMcpTool {
    server_name: String,
    tool_name: String,
    registered_name: String,
    description: String,
    parameters: Value,
    timeout: Duration,
    trusted: bool,
    service: Arc<RunningMcpService>,
}

impl DiscoveredMcpTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        registered_name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        timeout: Duration,
        trusted: bool,
        service: Arc<RunningMcpService>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            registered_name: registered_name.into(),
            description: description.into(),
            parameters,
            timeout,
            trusted,
            service,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Re-register under a different name (server-prefixed on collision).
    pub fn renamed(mut self, registered_name: impl Into<String>) -> Self {
        self.registered_name = registered_name.into();
        self
    }
}

#[async_trait]
impl Tool for DiscoveredMcpTool {
    fn name(&self) -> &str {
        &self.registered_name
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Mcp
    }

    fn declaration(&self) -> FunctionDeclaration {
        FunctionDeclaration {
            name: self.registered_name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    async fn should_confirm(
        &self,
        _args: &Map<String, Value>,
        _token: &CancellationToken,
    ) -> anyhow::Result<Option<ConfirmationDetails>> {
        if self.trusted {
            return Ok(None);
        }
        Ok(Some(ConfirmationDetails::Mcp {
            server: self.server_name.clone(),
            tool: self.tool_name.clone(),
        }))
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        token: CancellationToken,
    ) -> Result<ToolResult, ToolError> {
        let request = CallToolRequestParam {
            name: self.tool_name.clone().into(),
            arguments: Some(args),
        };

        let call = self.service.call_tool(request);
        let result = tokio::select! {
            result = tokio::time::timeout(self.timeout, call) => {
                match result {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(ToolError::execution(format!(
                            "MCP tool '{}' on '{}' timed out after {:?}",
                            self.tool_name, self.server_name, self.timeout
                        )));
                    }
                }
            }
            _ = token.cancelled() => return Err(ToolError::cancelled()),
        };

        let result = result.map_err(|err| {
            ToolError::execution(format!(
                "MCP tool '{}' on '{}' failed: {err}",
                self.tool_name, self.server_name
            ))
        })?;

        let payload = serde_json::to_value(&result)
            .unwrap_or_else(|_| json!({"error": "unserializable MCP result"}));
        let display = payload
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|text| !text.is_empty());

        Ok(ToolResult {
            llm_content: payload,
            display,
        })
    }
}
