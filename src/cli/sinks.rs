//! History sinks for the terminal frontends.

use console::style;
use koda_core::core::{HistoryItem, HistorySink, ThoughtSummary, ToolCallStatus};

/// Styled rendering for the interactive session.
pub struct ConsoleSink;

impl HistorySink for ConsoleSink {
    fn append(&self, item: HistoryItem) {
        match item {
            HistoryItem::User { .. } => {}
            HistoryItem::Model { text } => {
                println!("{text}");
            }
            HistoryItem::Info { text } => {
                println!("{}", style(text).dim());
            }
            HistoryItem::Error { text } => {
                eprintln!("{}", style(text).red());
            }
            HistoryItem::ToolGroup { calls } => {
                for call in calls {
                    let marker = match call.status {
                        ToolCallStatus::Success => style("✓").green(),
                        ToolCallStatus::Cancelled => style("-").yellow(),
                        _ => style("✗").red(),
                    };
                    let display = call
                        .response
                        .as_ref()
                        .and_then(|response| response.result_display.clone())
                        .unwrap_or_default();
                    println!(
                        "{marker} {} {}",
                        style(&call.request.name).bold(),
                        style(first_line(&display)).dim()
                    );
                }
            }
            HistoryItem::SystemPrompt { text } => {
                eprintln!("{}", style(text).dim());
            }
        }
    }

    fn thought(&self, thought: &ThoughtSummary) {
        let line = if thought.subject.is_empty() {
            thought.description.clone()
        } else {
            format!("{}: {}", thought.subject, thought.description)
        };
        eprintln!("{}", style(format!("· {line}")).dim().italic());
    }
}

/// Plain-text sink for the one-shot mode: model text to stdout, the rest to
/// stderr.
pub struct PlainSink;

impl HistorySink for PlainSink {
    fn append(&self, item: HistoryItem) {
        match item {
            HistoryItem::Model { text } => print!("{text}"),
            HistoryItem::Error { text } => eprintln!("{text}"),
            HistoryItem::Info { text } => eprintln!("{text}"),
            _ => {}
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
