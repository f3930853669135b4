//! Transport selection and connection for MCP servers.
//!
//! The populated config field picks the transport: `command` spawns a stdio
//! child process, `httpUrl` uses streamable HTTP, `url` uses SSE. Headers and
//! env vars from the config are merged in; an OAuth retry passes its bearer
//! token through here.

use anyhow::{Context, Result, bail};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::ServiceExt;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::sse_client::SseClientConfig;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{SseClientTransport, StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;
use tracing::debug;

use crate::config::mcp::McpServerConfig;

pub type RunningMcpService = RunningService<RoleClient, ()>;

/// Which transport a server config selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportChoice {
    Stdio,
    StreamableHttp,
    Sse,
}

pub fn select_transport(config: &McpServerConfig) -> Result<TransportChoice> {
    if config.command.is_some() {
        Ok(TransportChoice::Stdio)
    } else if config.http_url.is_some() {
        Ok(TransportChoice::StreamableHttp)
    } else if config.url.is_some() {
        Ok(TransportChoice::Sse)
    } else {
        bail!("server config needs one of command, httpUrl or url")
    }
}

/// Connect and run the MCP initialize handshake.
pub async fn connect(
    server_name: &str,
    config: &McpServerConfig,
    bearer_token: Option<&str>,
) -> Result<RunningMcpService> {
    match select_transport(config)? {
        TransportChoice::Stdio => connect_stdio(server_name, config).await,
        TransportChoice::StreamableHttp => {
            let url = config.http_url.as_deref().expect("checked by selection");
            let client = http_client(config, bearer_token)?;
            debug!(server = server_name, url, "connecting via streamable HTTP");
            let transport = StreamableHttpClientTransport::with_client(
                client,
                StreamableHttpClientTransportConfig {
                    uri: url.to_string().into(),
                    ..Default::default()
                },
            );
            ()
                .serve(transport)
                .await
                .with_context(|| format!("streamable HTTP connect to '{server_name}' failed"))
        }
        TransportChoice::Sse => {
            let url = config.url.as_deref().expect("checked by selection");
            let client = http_client(config, bearer_token)?;
            debug!(server = server_name, url, "connecting via SSE");
            let transport = SseClientTransport::start_with_client(
                client,
                SseClientConfig {
                    sse_endpoint: url.to_string().into(),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("SSE transport for '{server_name}' failed"))?;
            ()
                .serve(transport)
                .await
                .with_context(|| format!("SSE connect to '{server_name}' failed"))
        }
    }
}

async fn connect_stdio(server_name: &str, config: &McpServerConfig) -> Result<RunningMcpService> {
    let command_line = config.command.as_deref().expect("checked by selection");
    debug!(server = server_name, command = command_line, "spawning stdio server");

    let mut command = Command::new(command_line);
    command.args(&config.args);
    if let Some(cwd) = &config.cwd {
        command.current_dir(cwd);
    }
    if !config.env.is_empty() {
        command.envs(&config.env);
    }
    // Own process group so shutdown can reap the whole tree.
    command.process_group(0);

    let child = TokioChildProcess::new(command)
        .with_context(|| format!("failed to spawn '{command_line}' for '{server_name}'"))?;
    ()
        .serve(child)
        .await
        .with_context(|| format!("stdio connect to '{server_name}' failed"))
}

/// reqwest client carrying config headers plus an optional bearer token.
fn http_client(config: &McpServerConfig, bearer_token: Option<&str>) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.headers {
        let name: HeaderName = key
            .parse()
            .with_context(|| format!("invalid header name '{key}'"))?;
        let value: HeaderValue = value
            .parse()
            .with_context(|| format!("invalid header value for '{key}'"))?;
        headers.insert(name, value);
    }
    if let Some(token) = bearer_token {
        let value: HeaderValue = format!("Bearer {token}")
            .parse()
            .context("invalid bearer token")?;
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .context("failed to build HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_selection_precedence() {
        let stdio = McpServerConfig {
            command: Some("server".into()),
            http_url: Some("https://x".into()),
            url: Some("https://y".into()),
            ..Default::default()
        };
        assert_eq!(select_transport(&stdio).unwrap(), TransportChoice::Stdio);

        let http = McpServerConfig {
            http_url: Some("https://x".into()),
            url: Some("https://y".into()),
            ..Default::default()
        };
        assert_eq!(
            select_transport(&http).unwrap(),
            TransportChoice::StreamableHttp
        );

        let sse = McpServerConfig {
            url: Some("https://y".into()),
            ..Default::default()
        };
        assert_eq!(select_transport(&sse).unwrap(), TransportChoice::Sse);

        assert!(select_transport(&McpServerConfig::default()).is_err());
    }
}
