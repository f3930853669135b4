//! Typed events flowing out of a turn and through the orchestrator.
//!
//! One turn is a finite, non-restartable stream of these events: zero or more
//! content chunks and tool-call requests, then exactly one terminal event.

use serde_json::{Map, Value};

use crate::gemini::{FinishReason, Part};
use crate::tools::{ConfirmationDetails, ToolErrorType};

/// A tool invocation requested during a turn.
#[derive(Debug, Clone)]
pub struct ToolCallRequestInfo {
    /// Unique within the session; synthesized when the backend omits it.
    pub call_id: String,
    pub name: String,
    pub args: Map<String, Value>,
    /// Calls issued by the UI (slash commands). Their results are never
    /// echoed back to the model.
    pub is_client_initiated: bool,
    pub prompt_id: String,
}

#[derive(Debug, Clone)]
pub struct ToolCallResponseInfo {
    pub call_id: String,
    pub response_parts: Vec<Part>,
    pub result_display: Option<String>,
    pub error: Option<String>,
    pub error_type: Option<ToolErrorType>,
}

/// A reasoning summary surfaced while the model thinks.
#[derive(Debug, Clone, PartialEq)]
pub struct ThoughtSummary {
    pub subject: String,
    pub description: String,
}

impl ThoughtSummary {
    /// Thought text arrives as `**subject** description`; anything without
    /// the bold prefix becomes a description-only summary.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("**") {
            if let Some(end) = rest.find("**") {
                let subject = rest[..end].trim().to_string();
                let description = rest[end + 2..].trim().to_string();
                return Self {
                    subject,
                    description,
                };
            }
        }
        Self {
            subject: String::new(),
            description: trimmed.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TurnEvent {
    Content(String),
    Thought(ThoughtSummary),
    ToolCallRequest(ToolCallRequestInfo),
    ToolCallConfirmation {
        call_id: String,
        details: ConfirmationDetails,
    },
    ToolCallResponse(ToolCallResponseInfo),
    UserCancelled,
    Error {
        message: String,
        status: Option<u16>,
    },
    ChatCompressed {
        old_tokens: u64,
        new_tokens: u64,
    },
    Finished(FinishReason),
    MaxSessionTurns,
    LoopDetected,
}

/// Human-readable warning for abnormal finish reasons; `None` for a clean
/// stop.
pub fn finish_reason_warning(reason: FinishReason) -> Option<&'static str> {
    match reason {
        FinishReason::Stop => None,
        FinishReason::MaxTokens => {
            Some("Response truncated: the maximum output token limit was reached.")
        }
        FinishReason::Safety => Some("Response stopped by safety filters."),
        FinishReason::Recitation => {
            Some("Response stopped because it began reciting training data.")
        }
        FinishReason::Language => Some("Response stopped due to an unsupported language."),
        FinishReason::Blocklist => Some("Response stopped by a term blocklist."),
        FinishReason::ProhibitedContent => {
            Some("Response stopped because it contained prohibited content.")
        }
        FinishReason::Spii => {
            Some("Response stopped to avoid exposing sensitive personal information.")
        }
        FinishReason::MalformedFunctionCall => {
            Some("The model produced a malformed tool call and was stopped.")
        }
        FinishReason::ImageSafety => Some("Response stopped by image safety filters."),
        FinishReason::UnexpectedToolCall => Some("The model called a tool it was not offered."),
        FinishReason::Other => Some("The model stopped for an unspecified reason."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thought_parsing_extracts_bold_subject() {
        let thought = ThoughtSummary::parse("**Planning the edit** I will start by reading foo.");
        assert_eq!(thought.subject, "Planning the edit");
        assert_eq!(thought.description, "I will start by reading foo.");
    }

    #[test]
    fn thought_without_subject_is_description_only() {
        let thought = ThoughtSummary::parse("just musing");
        assert_eq!(thought.subject, "");
        assert_eq!(thought.description, "just musing");
    }

    #[test]
    fn unterminated_bold_prefix_falls_back() {
        let thought = ThoughtSummary::parse("**half open");
        assert_eq!(thought.subject, "");
        assert_eq!(thought.description, "**half open");
    }

    #[test]
    fn stop_has_no_warning() {
        assert!(finish_reason_warning(FinishReason::Stop).is_none());
        assert!(finish_reason_warning(FinishReason::MaxTokens).is_some());
        assert!(finish_reason_warning(FinishReason::UnexpectedToolCall).is_some());
    }
}
