//! The stream orchestrator: accepts a user query, runs turns, routes tool
//! calls through the scheduler, and feeds tool responses back as
//! continuations until a turn ends without tool calls.

use std::sync::{Arc, Mutex as StdMutex};

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::constants::{defaults, models};
use crate::gemini::{
    Content, FunctionCall, GenerateContentRequest, Part, SystemInstruction,
};
use crate::llm::provider::ContentGenerator;
use crate::tools::{ConfirmationOutcome, ToolErrorType, ToolRegistry};

use super::compression::{CompressionConfig, Compressor};
use super::events::{ThoughtSummary, ToolCallRequestInfo, TurnEvent, finish_reason_warning};
use super::scheduler::{SchedulerEvent, ToolScheduler, TrackedToolCall};
use super::session::Session;
use super::turn::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Idle,
    Responding,
    WaitingForConfirmation,
}

/// Typed history items appended for the UI.
#[derive(Debug, Clone)]
pub enum HistoryItem {
    User { text: String },
    Model { text: String },
    Info { text: String },
    Error { text: String },
    ToolGroup { calls: Vec<TrackedToolCall> },
    SystemPrompt { text: String },
}

/// The UI's view of the conversation. The orchestrator only appends; it never
/// inspects UI state.
pub trait HistorySink: Send + Sync {
    fn append(&self, item: HistoryItem);

    /// Transient reasoning updates; not part of history.
    fn thought(&self, _thought: &ThoughtSummary) {}
}

/// A sink that just collects items; used by the one-shot mode and tests.
#[derive(Default)]
pub struct CollectingSink {
    items: StdMutex<Vec<HistoryItem>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<HistoryItem> {
        self.items.lock().expect("sink poisoned").clone()
    }
}

impl HistorySink for CollectingSink {
    fn append(&self, item: HistoryItem) {
        self.items.lock().expect("sink poisoned").push(item);
    }
}

/// Outcome of input pre-processing (slash commands, at-commands, shell
/// passthrough) supplied by the UI layer.
pub enum ProcessedInput {
    /// Replace the outbound message.
    SubmitPrompt(Vec<Part>),
    /// Route a client-initiated tool call straight to the scheduler.
    ScheduleTool {
        name: String,
        args: Map<String, Value>,
    },
    /// Fully handled; nothing to send.
    Handled,
}

pub trait InputProcessor: Send + Sync {
    /// `None` means the input is a plain prompt.
    fn process(&self, raw: &str) -> Option<ProcessedInput>;
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Bubbles to the outer UI to trigger an auth-refresh dialog.
    #[error("authentication expired; re-authentication required")]
    AuthUnauthorized,
    #[error("a submission is already in progress")]
    Busy,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Default, Clone)]
pub struct SubmitOutcome {
    pub cancelled: bool,
    pub loop_detected: bool,
    pub max_turns_reached: bool,
    /// A backend error ended the submission (already reported to the sink).
    pub backend_error: bool,
    /// Model text flushed this submission, in order.
    pub response_text: String,
    /// Terminal tool failures (name, type), for the one-shot exit code.
    pub tool_failures: Vec<(String, ToolErrorType)>,
}

pub struct OrchestratorOptions {
    pub system_prompt: Option<String>,
    pub split_threshold: usize,
    pub compression: Option<CompressionConfig>,
    /// Skip tool confirmations (non-interactive mode).
    pub auto_approve: bool,
    /// When set, restorable tools snapshot through this store.
    pub checkpoints: Option<Arc<super::checkpoint::CheckpointStore>>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            split_threshold: defaults::STREAM_SPLIT_THRESHOLD,
            compression: None,
            auto_approve: false,
            checkpoints: None,
        }
    }
}

/// Cancels the in-flight submission, if any. Safe to call at any time from
/// any thread; cancellation is idempotent.
#[derive(Clone)]
pub struct CancelHandle {
    slot: Arc<StdMutex<Option<CancellationToken>>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if let Some(token) = self.slot.lock().expect("cancel slot poisoned").as_ref() {
            token.cancel();
        }
    }
}

pub struct Orchestrator {
    session: Session,
    generator: Arc<dyn ContentGenerator>,
    registry: Arc<ToolRegistry>,
    scheduler: Arc<ToolScheduler>,
    sink: Arc<dyn HistorySink>,
    input_processor: Option<Arc<dyn InputProcessor>>,
    compressor: Option<Compressor>,
    options: OrchestratorOptions,
    state: Arc<StdMutex<StreamingState>>,
    cancel_slot: Arc<StdMutex<Option<CancellationToken>>>,
    turns_used: u32,
}

impl Orchestrator {
    /// Build the orchestrator and the scheduler status stream the UI renders.
    pub fn new(
        session: Session,
        generator: Arc<dyn ContentGenerator>,
        registry: Arc<ToolRegistry>,
        sink: Arc<dyn HistorySink>,
        options: OrchestratorOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (scheduler_tx, scheduler_rx) = mpsc::unbounded_channel();
        let mut scheduler = ToolScheduler::new(
            Arc::clone(&registry),
            scheduler_tx,
            options.auto_approve,
        );
        if let Some(store) = &options.checkpoints {
            scheduler = scheduler.with_checkpoint_hook(Arc::new(
                super::checkpoint::SessionCheckpointHook::new(
                    Arc::clone(store),
                    session.history_accessor(),
                ),
            ));
        }
        let scheduler = Arc::new(scheduler);
        let compressor = options
            .compression
            .map(|config| Compressor::new(Arc::clone(&generator), config));

        if let Some(system_prompt) = &options.system_prompt {
            if std::env::var(crate::config::constants::env_vars::LOG_SYSTEM_PROMPT).is_ok() {
                sink.append(HistoryItem::SystemPrompt {
                    text: system_prompt.clone(),
                });
            }
        }

        (
            Self {
                session,
                generator,
                registry,
                scheduler,
                sink,
                input_processor: None,
                compressor,
                options,
                state: Arc::new(StdMutex::new(StreamingState::Idle)),
                cancel_slot: Arc::new(StdMutex::new(None)),
                turns_used: 0,
            },
            scheduler_rx,
        )
    }

    pub fn with_input_processor(mut self, processor: Arc<dyn InputProcessor>) -> Self {
        self.input_processor = Some(processor);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> StreamingState {
        *self.state.lock().expect("state poisoned")
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            slot: Arc::clone(&self.cancel_slot),
        }
    }

    /// Forward a confirmation decision to the scheduler.
    pub fn handle_confirmation(&self, call_id: &str, outcome: ConfirmationOutcome) {
        self.scheduler.handle_confirmation(call_id, outcome);
    }

    /// Cloneable scheduler handle, for answering confirmations while a
    /// submission holds the orchestrator mutably.
    pub fn scheduler(&self) -> Arc<ToolScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Submit one user query and drive it (and all its continuations) to
    /// completion.
    pub async fn submit(&mut self, raw: &str) -> Result<SubmitOutcome, OrchestratorError> {
        if self.state() != StreamingState::Idle {
            return Err(OrchestratorError::Busy);
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(SubmitOutcome::default());
        }

        // Pre-process: slash/at commands may replace, reroute, or swallow the
        // input.
        let outbound = match self
            .input_processor
            .as_ref()
            .and_then(|processor| processor.process(trimmed))
        {
            Some(ProcessedInput::Handled) => return Ok(SubmitOutcome::default()),
            Some(ProcessedInput::ScheduleTool { name, args }) => {
                return self.run_client_tool(name, args).await;
            }
            Some(ProcessedInput::SubmitPrompt(parts)) => parts,
            None => vec![Part::text(trimmed)],
        };

        let token = CancellationToken::new();
        *self.cancel_slot.lock().expect("cancel slot poisoned") = Some(token.clone());
        self.session.set_quota_error(false);
        let prompt_id = self.session.next_prompt_id();

        self.sink.append(HistoryItem::User {
            text: trimmed.to_string(),
        });
        self.set_state(StreamingState::Responding);

        let outcome = self.run_turn_loop(outbound, &prompt_id, token).await;

        self.set_state(StreamingState::Idle);
        *self.cancel_slot.lock().expect("cancel slot poisoned") = None;
        outcome
    }

    fn set_state(&self, state: StreamingState) {
        *self.state.lock().expect("state poisoned") = state;
    }

    /// A slash-command tool call: scheduled directly, never echoed to the
    /// model.
    async fn run_client_tool(
        &mut self,
        name: String,
        args: Map<String, Value>,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        let request = ToolCallRequestInfo {
            call_id: format!("client-{}-{}", name, self.session.prompt_count()),
            name,
            args,
            is_client_initiated: true,
            prompt_id: format!("{}########client", self.session.id()),
        };

        let token = CancellationToken::new();
        *self.cancel_slot.lock().expect("cancel slot poisoned") = Some(token.clone());
        self.set_state(StreamingState::WaitingForConfirmation);
        let completed = self.scheduler.schedule(vec![request], token).await;
        self.set_state(StreamingState::Idle);
        *self.cancel_slot.lock().expect("cancel slot poisoned") = None;

        let mut outcome = SubmitOutcome::default();
        collect_failures(&completed, &mut outcome);
        self.sink.append(HistoryItem::ToolGroup { calls: completed });
        Ok(outcome)
    }

    async fn run_turn_loop(
        &mut self,
        first_message: Vec<Part>,
        prompt_id: &str,
        token: CancellationToken,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        let mut outcome = SubmitOutcome::default();
        let mut next_message = Some(first_message);

        while let Some(message_parts) = next_message.take() {
            let max_turns = self.session.max_turns();
            if max_turns >= 0 && self.turns_used >= max_turns as u32 {
                self.sink.append(HistoryItem::Info {
                    text: format!(
                        "Reached the session turn limit ({max_turns}). Start a new session to continue."
                    ),
                });
                outcome.max_turns_reached = true;
                break;
            }
            self.turns_used += 1;

            self.maybe_compress(prompt_id).await;

            self.session
                .add_history(Content::user_parts(message_parts.clone()));

            let request = self.build_request();
            let turn = Turn::new(Arc::clone(&self.generator), prompt_id);
            let mut stream = turn.run(request, token.child_token());

            let mut buffer = StreamBuffer::new(self.options.split_threshold);
            let mut pending_calls: Vec<ToolCallRequestInfo> = Vec::new();
            let mut turn_error: Option<(String, Option<u16>)> = None;
            let mut cancelled = false;
            let mut loop_detected = false;

            while let Some(event) = stream.next().await {
                match event {
                    TurnEvent::Thought(thought) => self.sink.thought(&thought),
                    TurnEvent::Content(text) => {
                        buffer.push(&text);
                        while let Some(flushed) = buffer.take_ready() {
                            outcome.response_text.push_str(&flushed);
                            self.sink.append(HistoryItem::Model { text: flushed });
                        }
                    }
                    TurnEvent::ToolCallRequest(info) => pending_calls.push(info),
                    TurnEvent::Finished(reason) => {
                        if let Some(warning) = finish_reason_warning(reason) {
                            self.sink.append(HistoryItem::Info {
                                text: warning.to_string(),
                            });
                        }
                    }
                    TurnEvent::LoopDetected => loop_detected = true,
                    TurnEvent::UserCancelled => cancelled = true,
                    TurnEvent::Error { message, status } => {
                        turn_error = Some((message, status));
                    }
                    TurnEvent::ChatCompressed { .. }
                    | TurnEvent::MaxSessionTurns
                    | TurnEvent::ToolCallConfirmation { .. }
                    | TurnEvent::ToolCallResponse(_) => {}
                }
            }

            // Finalize the pending UI buffer before any terminal message.
            if let Some(rest) = buffer.take_rest() {
                outcome.response_text.push_str(&rest);
                self.sink.append(HistoryItem::Model { text: rest });
            }

            self.record_model_turn(buffer.total(), &pending_calls);

            if cancelled {
                self.fulfil_abandoned_calls(&pending_calls);
                self.sink.append(HistoryItem::Info {
                    text: "Request cancelled.".to_string(),
                });
                outcome.cancelled = true;
                break;
            }

            if let Some((message, status)) = turn_error {
                if status == Some(401) {
                    return Err(OrchestratorError::AuthUnauthorized);
                }
                if status == Some(429) {
                    self.session.set_quota_error(true);
                }
                self.fulfil_abandoned_calls(&pending_calls);
                self.sink.append(HistoryItem::Error {
                    text: format_api_error(&message, status, self.session.model()),
                });
                outcome.backend_error = true;
                break;
            }

            if loop_detected {
                self.fulfil_abandoned_calls(&pending_calls);
                self.sink.append(HistoryItem::Info {
                    text: "A potential loop was detected and the turn was halted.".to_string(),
                });
                outcome.loop_detected = true;
                break;
            }

            if pending_calls.is_empty() {
                break;
            }

            // Tool phase: schedule the whole batch, then decide whether a
            // continuation goes back to the model.
            self.set_state(StreamingState::WaitingForConfirmation);
            let completed = self
                .scheduler
                .schedule(pending_calls, token.child_token())
                .await;
            self.set_state(StreamingState::Responding);

            collect_failures(&completed, &mut outcome);
            self.sink.append(HistoryItem::ToolGroup {
                calls: completed.clone(),
            });

            let to_submit: Vec<&TrackedToolCall> = completed
                .iter()
                .filter(|call| !call.request.is_client_initiated && call.status.is_terminal())
                .collect();
            if to_submit.is_empty() {
                break;
            }

            let call_ids: Vec<String> = to_submit
                .iter()
                .map(|call| call.request.call_id.clone())
                .collect();
            let merged: Vec<Part> = to_submit
                .iter()
                .filter_map(|call| call.response.as_ref())
                .flat_map(|response| response.response_parts.clone())
                .collect();

            let all_cancelled = to_submit
                .iter()
                .all(|call| call.status == super::scheduler::ToolCallStatus::Cancelled);

            if all_cancelled || self.session.quota_error_occurred() {
                // No continuation, but the model must never be left with an
                // unfulfilled tool call: append the responses directly.
                if all_cancelled {
                    debug!("all tool calls cancelled; appending responses without continuation");
                } else {
                    warn!("quota error occurred; skipping post-tool continuation");
                }
                self.session.add_history(Content::user_parts(merged));
                self.scheduler.mark_tools_as_submitted(&call_ids);
                if all_cancelled {
                    outcome.cancelled = true;
                }
                break;
            }

            self.scheduler.mark_tools_as_submitted(&call_ids);
            next_message = Some(merged);
        }

        Ok(outcome)
    }

    fn build_request(&self) -> GenerateContentRequest {
        let mut request = GenerateContentRequest::new(self.session.curated_history());
        let tools = self.registry.as_request_tools();
        if !tools.is_empty() {
            request.tools = Some(tools);
        }
        if let Some(system_prompt) = &self.options.system_prompt {
            request.system_instruction = Some(SystemInstruction::Text(system_prompt.clone()));
        }
        request
    }

    /// Reconstruct the model turn for session history: full text first, then
    /// the function-call parts in arrival order.
    fn record_model_turn(&mut self, text: String, calls: &[ToolCallRequestInfo]) {
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        for call in calls {
            parts.push(Part::function_call(FunctionCall {
                name: call.name.clone(),
                args: Value::Object(call.args.clone()),
                id: Some(call.call_id.clone()),
            }));
        }
        // An empty model turn stays in the raw log; curation drops it.
        self.session.add_history(Content::model_parts(parts));
    }

    /// A turn that halts with collected-but-unscheduled tool calls must not
    /// leave the model with unfulfilled calls: append error responses for
    /// them directly.
    fn fulfil_abandoned_calls(&mut self, pending_calls: &[ToolCallRequestInfo]) {
        if pending_calls.is_empty() {
            return;
        }
        let parts: Vec<Part> = pending_calls
            .iter()
            .map(|call| {
                Part::function_response(crate::gemini::FunctionResponse {
                    name: call.name.clone(),
                    response: serde_json::json!({
                        "error": "Tool call was not executed because the turn ended."
                    }),
                    id: Some(call.call_id.clone()),
                })
            })
            .collect();
        self.session.add_history(Content::user_parts(parts));
    }

    async fn maybe_compress(&mut self, prompt_id: &str) {
        let Some(compressor) = &self.compressor else {
            return;
        };
        let curated = self.session.curated_history();
        match compressor.maybe_compress(&curated, prompt_id).await {
            Ok(Some(compressed)) => {
                self.sink.append(HistoryItem::Info {
                    text: format!(
                        "Chat history compressed from {} to {} tokens.",
                        compressed.old_tokens, compressed.new_tokens
                    ),
                });
                self.session.replace_history(compressed.history);
            }
            Ok(None) => {}
            Err(err) => warn!("history compression failed: {err}"),
        }
    }
}

fn collect_failures(calls: &[TrackedToolCall], outcome: &mut SubmitOutcome) {
    for call in calls {
        if let Some(response) = &call.response {
            if let Some(error_type) = response.error_type {
                outcome
                    .tool_failures
                    .push((call.request.name.clone(), error_type));
            }
        }
    }
}

/// Fold model context into the error shown to the user.
fn format_api_error(message: &str, status: Option<u16>, model: &str) -> String {
    match status {
        Some(429) => format!(
            "[API Error: {message}] Quota exhausted for {model}; consider switching to {} for the \
             rest of the session.",
            models::FLASH_FALLBACK_MODEL
        ),
        Some(status) => format!("[API Error ({status}): {message}] (model: {model})"),
        None => format!("[API Error: {message}] (model: {model})"),
    }
}

/// Streaming text buffer with markdown-safe splitting. Once the pending text
/// exceeds the threshold, the prefix up to the last safe boundary is flushed
/// as a complete message and the suffix stays live.
struct StreamBuffer {
    pending: String,
    everything: String,
    threshold: usize,
}

impl StreamBuffer {
    fn new(threshold: usize) -> Self {
        Self {
            pending: String::new(),
            everything: String::new(),
            threshold,
        }
    }

    fn push(&mut self, text: &str) {
        self.pending.push_str(text);
        self.everything.push_str(text);
    }

    fn take_ready(&mut self) -> Option<String> {
        if self.pending.len() <= self.threshold {
            return None;
        }
        let split = find_last_safe_split(&self.pending)?;
        if split == 0 {
            return None;
        }
        let head: String = self.pending[..split].to_string();
        self.pending.drain(..split);
        Some(head)
    }

    fn take_rest(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    fn total(&self) -> String {
        self.everything.clone()
    }
}

/// Byte index just past the last blank line that is not inside a fenced code
/// block; `None` when no safe boundary exists yet.
fn find_last_safe_split(text: &str) -> Option<usize> {
    let mut in_fence = false;
    let mut last_safe = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        offset += line.len();
        if !in_fence && line.trim().is_empty() {
            last_safe = Some(offset);
        }
    }
    last_safe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_point_skips_code_fences() {
        let text = "para one\n\n```rust\nlet x = 1;\n\nlet y = 2;\n```\ntail";
        let split = find_last_safe_split(text).unwrap();
        // The blank line inside the fence is not a boundary.
        assert_eq!(&text[..split], "para one\n\n");
    }

    #[test]
    fn no_boundary_means_no_split() {
        assert!(find_last_safe_split("one long paragraph with no break").is_none());
    }

    #[test]
    fn buffer_flushes_prefix_and_keeps_suffix() {
        let mut buffer = StreamBuffer::new(10);
        buffer.push("first block\n\nsecond");
        let flushed = buffer.take_ready().unwrap();
        assert_eq!(flushed, "first block\n\n");
        assert_eq!(buffer.take_rest().as_deref(), Some("second"));
        // Concatenation is lossless.
        assert_eq!(buffer.total(), "first block\n\nsecond");
    }

    #[test]
    fn buffer_under_threshold_does_not_flush() {
        let mut buffer = StreamBuffer::new(100);
        buffer.push("short\n\ntext");
        assert!(buffer.take_ready().is_none());
    }

    #[test]
    fn api_error_mentions_fallback_on_quota() {
        let message = format_api_error("quota exceeded", Some(429), "gemini-2.5-pro");
        assert!(message.contains("gemini-2.5-pro"));
        assert!(message.contains(models::FLASH_FALLBACK_MODEL));
    }
}
