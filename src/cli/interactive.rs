//! Interactive terminal session: a line-based REPL over the orchestrator.
//!
//! While a submission is in flight the loop keeps draining scheduler events
//! so tool confirmations can be answered; Ctrl-C cancels the current turn.

use std::io::Write as _;

use anyhow::Result;
use console::style;
use koda_core::core::{Orchestrator, OrchestratorError, SchedulerEvent};
use koda_core::tools::{ConfirmationDetails, ConfirmationOutcome};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

pub async fn run(
    mut orchestrator: Orchestrator,
    mut scheduler_events: mpsc::UnboundedReceiver<SchedulerEvent>,
) -> Result<()> {
    println!(
        "{} {} — {} to leave",
        style("koda").cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        style("/quit").dim()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", style(">").cyan().bold());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break; // EOF
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }
        if input == "/quit" || input == "/exit" {
            break;
        }

        drive_submission(&mut orchestrator, &mut scheduler_events, &mut lines, &input).await?;
    }

    Ok(())
}

async fn drive_submission(
    orchestrator: &mut Orchestrator,
    scheduler_events: &mut mpsc::UnboundedReceiver<SchedulerEvent>,
    lines: &mut Lines<BufReader<Stdin>>,
    input: &str,
) -> Result<()> {
    let scheduler = orchestrator.scheduler();
    let cancel = orchestrator.cancel_handle();

    let submit = orchestrator.submit(input);
    tokio::pin!(submit);

    loop {
        tokio::select! {
            result = &mut submit => {
                match result {
                    Ok(_) => {}
                    Err(OrchestratorError::AuthUnauthorized) => {
                        eprintln!(
                            "{}",
                            style("Authentication expired; please re-authenticate.").red()
                        );
                    }
                    Err(OrchestratorError::Busy) => {
                        eprintln!("{}", style("A turn is already in progress.").yellow());
                    }
                    Err(err) => return Err(err.into()),
                }
                return Ok(());
            }
            event = scheduler_events.recv() => {
                if let Some(SchedulerEvent::ConfirmationRequest { call_id, details }) = event {
                    let outcome = ask_confirmation(&details, lines).await?;
                    scheduler.handle_confirmation(&call_id, outcome);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            }
        }
    }
}

async fn ask_confirmation(
    details: &ConfirmationDetails,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<ConfirmationOutcome> {
    match details {
        ConfirmationDetails::Edit { file_path, preview } => {
            println!(
                "{} {}",
                style("Apply edit to").yellow(),
                style(file_path.display()).bold()
            );
            println!("{preview}");
        }
        ConfirmationDetails::Exec { command } => {
            println!("{} {}", style("Run command:").yellow(), style(command).bold());
        }
        ConfirmationDetails::Mcp { server, tool } => {
            println!(
                "{} {} {} {}",
                style("Call MCP tool").yellow(),
                style(tool).bold(),
                style("on server").yellow(),
                style(server).bold()
            );
        }
        ConfirmationDetails::Info { prompt } => {
            println!("{}", style(prompt).yellow());
        }
    }
    print!("{} ", style("[y]es / [a]lways / [N]o:").dim());
    std::io::stdout().flush()?;

    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => ConfirmationOutcome::ProceedOnce,
        "a" | "always" => ConfirmationOutcome::ProceedAlways,
        _ => ConfirmationOutcome::Cancel,
    })
}
