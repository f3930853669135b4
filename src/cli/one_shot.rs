//! Non-interactive mode: one prompt in, plain text out.
//!
//! Exit contract: 0 on success (including tool-not-found errors, which are
//! reported back to the model for a second turn), 1 on backend errors and on
//! tool execution failures.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use koda_core::core::{Orchestrator, OrchestratorError};
use koda_core::tools::ToolErrorType;

use super::sinks::PlainSink;

pub async fn run(mut orchestrator: Orchestrator, prompt: &str) -> Result<ExitCode> {
    let outcome = match orchestrator.submit(prompt).await {
        Ok(outcome) => outcome,
        Err(OrchestratorError::AuthUnauthorized) => {
            eprintln!("Authentication failed; run koda interactively to re-authenticate.");
            return Ok(ExitCode::from(1));
        }
        Err(err) => return Err(err.into()),
    };

    // The sink streamed the text already; just terminate the line.
    if !outcome.response_text.ends_with('\n') {
        println!();
    }

    if outcome.backend_error {
        return Ok(ExitCode::from(1));
    }
    let execution_failed = outcome
        .tool_failures
        .iter()
        .any(|(_, error_type)| *error_type == ToolErrorType::ExecutionFailed);
    if execution_failed {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

pub fn sink() -> Arc<PlainSink> {
    Arc::new(PlainSink)
}
