//! CLI argument parsing.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "koda",
    version,
    about = "Terminal coding agent with a streaming, tool-using LLM loop"
)]
pub struct Cli {
    /// Model id, e.g. gemini-2.5-pro
    #[arg(long)]
    pub model: Option<String>,

    /// Auth kind: api-key | vertex-ai | code-assist | openrouter
    #[arg(long)]
    pub auth: Option<String>,

    /// Workspace root; defaults to the current directory
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Run one prompt non-interactively and exit
    #[arg(short = 'p', long)]
    pub prompt: Option<String>,

    /// Skip all tool confirmations
    #[arg(long)]
    pub yolo: bool,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}
