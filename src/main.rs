mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use koda_core::config::{ConfigManager, constants, paths};
use koda_core::core::{
    CheckpointStore, CompressionConfig, Orchestrator, OrchestratorOptions, Session,
};
use koda_core::llm::{AuthKind, create_generator, resolve_auth_kind};
use koda_core::mcp::{AuthBrowser, McpClient, McpOauthFlow, McpRegistry, McpTokenStore};
use koda_core::prompts;
use koda_core::tools::ToolRegistry;

use cli::args::Cli;
use cli::sinks::ConsoleSink;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    let workspace = match &args.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    // First-run side effect: mint the anonymous installation id.
    match paths::installation_id() {
        Ok(id) => debug!(installation_id = id, "installation identified"),
        Err(err) => warn!("could not establish installation id: {err}"),
    }

    let manager = ConfigManager::load(&workspace)?;
    let config = manager.config().clone();

    let model = args
        .model
        .clone()
        .unwrap_or_else(|| config.agent.model.clone());
    let auth_override = args
        .auth
        .as_deref()
        .or(config.agent.auth.as_deref())
        .and_then(AuthKind::parse);
    let auth = resolve_auth_kind(auth_override);
    let generator = create_generator(auth, &model)
        .map_err(|err| anyhow::anyhow!("failed to initialize backend: {err}"))?;

    // Tools: builtins first, then MCP discovery (failures never abort).
    let mut registry = ToolRegistry::with_builtins(&workspace);
    let mcp_registry = Arc::new(McpRegistry::new());
    let mcp_client = McpClient::new(config.mcp.clone(), Arc::clone(&mcp_registry)).with_oauth(
        Arc::new(McpOauthFlow::new(
            Arc::new(TerminalAuthBrowser),
            McpTokenStore::default_location(),
        )),
    );
    if let Err(err) = mcp_client.discover_and_register(&mut registry).await {
        warn!("MCP discovery failed: {err:#}");
    }
    let registry = Arc::new(registry);

    let session = Session::new(&model, auth, config.agent.max_session_turns);
    let one_shot = args.prompt.is_some();

    let checkpoints = config.agent.checkpointing.then(|| {
        let temp_dir = paths::project_temp_dir(&workspace);
        Arc::new(CheckpointStore::new(
            paths::checkpoints_dir(&temp_dir),
            workspace.clone(),
        ))
    });

    let options = OrchestratorOptions {
        system_prompt: Some(prompts::system_prompt(&workspace)),
        split_threshold: constants::defaults::STREAM_SPLIT_THRESHOLD,
        compression: Some(CompressionConfig::default()),
        auto_approve: args.yolo || one_shot,
        checkpoints,
    };

    let exit = if let Some(prompt) = &args.prompt {
        let (orchestrator, _scheduler_events) =
            Orchestrator::new(session, generator, registry, cli::one_shot::sink(), options);
        cli::one_shot::run(orchestrator, prompt).await?
    } else {
        let (orchestrator, scheduler_events) = Orchestrator::new(
            session,
            generator,
            registry,
            Arc::new(ConsoleSink),
            options,
        );
        cli::interactive::run(orchestrator, scheduler_events).await?;
        ExitCode::SUCCESS
    };

    mcp_client.shutdown().await;
    Ok(exit)
}

/// Terminal leg of the MCP OAuth flow: show the URL, read the pasted code.
struct TerminalAuthBrowser;

#[async_trait::async_trait]
impl AuthBrowser for TerminalAuthBrowser {
    async fn authorize(&self, authorization_url: &str) -> Result<String> {
        eprintln!("Open this URL to authorize access:\n\n  {authorization_url}\n");
        eprint!("Paste the authorization code: ");
        use std::io::Write as _;
        std::io::stderr().flush()?;

        let mut code = String::new();
        std::io::stdin().read_line(&mut code)?;
        let code = code.trim().to_string();
        anyhow::ensure!(!code.is_empty(), "no authorization code provided");
        Ok(code)
    }
}
