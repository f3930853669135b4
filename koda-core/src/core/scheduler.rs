//! The tool scheduler: validation, confirmation, parallel execution, and
//! response assembly for one batch of tool calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::constants::tools as tool_names;
use crate::gemini::{FunctionResponse, Part};
use crate::tools::{
    ConfirmationDetails, ConfirmationOutcome, ToolErrorType, ToolKind, ToolRegistry,
    validate_args_against_schema,
};

use super::events::{ToolCallRequestInfo, ToolCallResponseInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Validating,
    Scheduled,
    AwaitingApproval,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ToolCallStatus::Success | ToolCallStatus::Error | ToolCallStatus::Cancelled
        )
    }
}

/// One tool call plus everything the scheduler knows about it.
#[derive(Debug, Clone)]
pub struct TrackedToolCall {
    pub request: ToolCallRequestInfo,
    pub status: ToolCallStatus,
    pub confirmation: Option<ConfirmationDetails>,
    pub response: Option<ToolCallResponseInfo>,
    pub response_submitted_to_model: bool,
}

impl TrackedToolCall {
    fn new(request: ToolCallRequestInfo) -> Self {
        Self {
            request,
            status: ToolCallStatus::Validating,
            confirmation: None,
            response: None,
            response_submitted_to_model: false,
        }
    }
}

/// Status stream consumed by the UI.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    CallsUpdated(Vec<TrackedToolCall>),
    ConfirmationRequest {
        call_id: String,
        details: ConfirmationDetails,
    },
}

/// Injected at construction so the scheduler never reaches back into the
/// session for history.
#[async_trait]
pub trait CheckpointHook: Send + Sync {
    async fn snapshot(&self, call: &ToolCallRequestInfo, file_path: Option<String>);
}

pub struct ToolScheduler {
    registry: Arc<ToolRegistry>,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    always_allow: StdMutex<HashSet<ToolKind>>,
    pending_confirmations: StdMutex<HashMap<String, oneshot::Sender<ConfirmationOutcome>>>,
    completed: StdMutex<HashMap<String, TrackedToolCall>>,
    /// Skip the confirmation protocol entirely (non-interactive mode).
    auto_approve: bool,
    checkpoint: Option<Arc<dyn CheckpointHook>>,
}

impl ToolScheduler {
    pub fn new(
        registry: Arc<ToolRegistry>,
        events: mpsc::UnboundedSender<SchedulerEvent>,
        auto_approve: bool,
    ) -> Self {
        Self {
            registry,
            events,
            always_allow: StdMutex::new(HashSet::new()),
            pending_confirmations: StdMutex::new(HashMap::new()),
            completed: StdMutex::new(HashMap::new()),
            auto_approve,
            checkpoint: None,
        }
    }

    pub fn with_checkpoint_hook(mut self, hook: Arc<dyn CheckpointHook>) -> Self {
        self.checkpoint = Some(hook);
        self
    }

    /// Drive a batch to completion. Approved calls execute in parallel; the
    /// future resolves once every call is terminal, in request order.
    pub async fn schedule(
        &self,
        requests: Vec<ToolCallRequestInfo>,
        token: CancellationToken,
    ) -> Vec<TrackedToolCall> {
        let batch: Arc<Mutex<Vec<TrackedToolCall>>> = Arc::new(Mutex::new(
            requests.iter().cloned().map(TrackedToolCall::new).collect(),
        ));
        self.publish_snapshot(&batch).await;

        let tasks = requests.into_iter().enumerate().map(|(index, request)| {
            let batch = Arc::clone(&batch);
            let token = token.clone();
            async move {
                self.drive_call(index, request, &batch, token).await;
            }
        });
        join_all(tasks).await;

        let finished = batch.lock().await.clone();
        let mut completed = self.completed.lock().expect("completed map poisoned");
        for call in &finished {
            completed.insert(call.request.call_id.clone(), call.clone());
        }
        finished
    }

    /// UI answer for a call parked in `AwaitingApproval`. Unknown ids are
    /// ignored.
    pub fn handle_confirmation(&self, call_id: &str, outcome: ConfirmationOutcome) {
        let sender = self
            .pending_confirmations
            .lock()
            .expect("confirmation map poisoned")
            .remove(call_id);
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => warn!(call_id, "confirmation for unknown or finished call"),
        }
    }

    /// Flip `response_submitted_to_model`; calling twice is a no-op.
    pub fn mark_tools_as_submitted(&self, call_ids: &[String]) {
        let mut completed = self.completed.lock().expect("completed map poisoned");
        for call_id in call_ids {
            if let Some(call) = completed.get_mut(call_id) {
                call.response_submitted_to_model = true;
            }
        }
    }

    pub fn submitted_state(&self, call_id: &str) -> Option<bool> {
        self.completed
            .lock()
            .expect("completed map poisoned")
            .get(call_id)
            .map(|call| call.response_submitted_to_model)
    }

    async fn drive_call(
        &self,
        index: usize,
        request: ToolCallRequestInfo,
        batch: &Arc<Mutex<Vec<TrackedToolCall>>>,
        token: CancellationToken,
    ) {
        // Validate: the tool must exist and the arguments must fit its schema.
        let Some(tool) = self.registry.get(&request.name) else {
            let response = error_response(
                &request,
                format!("Tool \"{}\" not found in registry.", request.name),
                ToolErrorType::NotFound,
            );
            self.finish(index, &request, ToolCallStatus::Error, response, batch)
                .await;
            return;
        };

        let declaration = tool.declaration();
        if let Err(message) = validate_args_against_schema(&declaration.parameters, &request.args) {
            let response = error_response(
                &request,
                format!("Invalid arguments for {}: {message}", request.name),
                ToolErrorType::InvalidArgs,
            );
            self.finish(index, &request, ToolCallStatus::Error, response, batch)
                .await;
            return;
        }

        self.update_status(index, ToolCallStatus::Scheduled, batch).await;

        // Confirm, unless the session already trusts this tool kind.
        let mut args = request.args.clone();
        let skip_confirmation = self.auto_approve
            || self
                .always_allow
                .lock()
                .expect("allow set poisoned")
                .contains(&tool.kind());

        if !skip_confirmation {
            let details = match tool.should_confirm(&args, &token).await {
                Ok(details) => details,
                Err(err) => {
                    let response = error_response(
                        &request,
                        format!("Confirmation check failed: {err}"),
                        ToolErrorType::ExecutionFailed,
                    );
                    self.finish(index, &request, ToolCallStatus::Error, response, batch)
                        .await;
                    return;
                }
            };

            if let Some(details) = details {
                match self
                    .await_approval(index, &request, details, batch, &token)
                    .await
                {
                    Approval::Proceed => {}
                    Approval::ProceedWith(edited) => args = edited,
                    Approval::Denied => {
                        let response = error_response(
                            &request,
                            "Tool execution was cancelled by the user.".to_string(),
                            ToolErrorType::Cancelled,
                        );
                        self.finish(index, &request, ToolCallStatus::Cancelled, response, batch)
                            .await;
                        return;
                    }
                }
            }
        }

        // Execute.
        self.update_status(index, ToolCallStatus::Executing, batch).await;
        match tool.execute(args, token.child_token()).await {
            Ok(result) => {
                let response = ToolCallResponseInfo {
                    call_id: request.call_id.clone(),
                    response_parts: vec![Part::function_response(FunctionResponse {
                        name: request.name.clone(),
                        response: json!({"output": result.llm_content}),
                        id: Some(request.call_id.clone()),
                    })],
                    result_display: result.display,
                    error: None,
                    error_type: None,
                };
                self.finish(index, &request, ToolCallStatus::Success, response, batch)
                    .await;
            }
            Err(err) => {
                let status = if err.error_type == ToolErrorType::Cancelled {
                    ToolCallStatus::Cancelled
                } else {
                    ToolCallStatus::Error
                };
                let response = error_response(&request, err.message, err.error_type);
                self.finish(index, &request, status, response, batch).await;
            }
        }
    }

    async fn await_approval(
        &self,
        index: usize,
        request: &ToolCallRequestInfo,
        details: ConfirmationDetails,
        batch: &Arc<Mutex<Vec<TrackedToolCall>>>,
        token: &CancellationToken,
    ) -> Approval {
        {
            let mut calls = batch.lock().await;
            calls[index].status = ToolCallStatus::AwaitingApproval;
            calls[index].confirmation = Some(details.clone());
        }
        self.publish_snapshot(batch).await;

        // Restorable tools snapshot a checkpoint once they park for approval.
        if tool_names::RESTORABLE.contains(&request.name.as_str()) {
            if let Some(hook) = &self.checkpoint {
                let file_path = request
                    .args
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                hook.snapshot(request, file_path).await;
            }
        }

        let (sender, receiver) = oneshot::channel();
        self.pending_confirmations
            .lock()
            .expect("confirmation map poisoned")
            .insert(request.call_id.clone(), sender);
        let _ = self.events.send(SchedulerEvent::ConfirmationRequest {
            call_id: request.call_id.clone(),
            details,
        });

        let outcome = tokio::select! {
            outcome = receiver => outcome.ok(),
            _ = token.cancelled() => None,
        };
        self.pending_confirmations
            .lock()
            .expect("confirmation map poisoned")
            .remove(&request.call_id);

        match outcome {
            Some(ConfirmationOutcome::ProceedOnce) => Approval::Proceed,
            Some(ConfirmationOutcome::ProceedAlways) => {
                if let Some(tool) = self.registry.get(&request.name) {
                    self.always_allow
                        .lock()
                        .expect("allow set poisoned")
                        .insert(tool.kind());
                }
                Approval::Proceed
            }
            Some(ConfirmationOutcome::ModifyAndProceed { args }) => Approval::ProceedWith(args),
            Some(ConfirmationOutcome::Cancel) | None => Approval::Denied,
        }
    }

    async fn update_status(
        &self,
        index: usize,
        status: ToolCallStatus,
        batch: &Arc<Mutex<Vec<TrackedToolCall>>>,
    ) {
        {
            let mut calls = batch.lock().await;
            calls[index].status = status;
        }
        self.publish_snapshot(batch).await;
    }

    async fn finish(
        &self,
        index: usize,
        request: &ToolCallRequestInfo,
        status: ToolCallStatus,
        response: ToolCallResponseInfo,
        batch: &Arc<Mutex<Vec<TrackedToolCall>>>,
    ) {
        debug!(
            call_id = request.call_id,
            tool = request.name,
            ?status,
            "tool call finished"
        );
        {
            let mut calls = batch.lock().await;
            calls[index].status = status;
            calls[index].response = Some(response);
            // Client-initiated results stay in the UI; they count as
            // submitted the moment they are terminal.
            if request.is_client_initiated {
                calls[index].response_submitted_to_model = true;
            }
        }
        self.publish_snapshot(batch).await;
    }

    async fn publish_snapshot(&self, batch: &Arc<Mutex<Vec<TrackedToolCall>>>) {
        let snapshot = batch.lock().await.clone();
        let _ = self.events.send(SchedulerEvent::CallsUpdated(snapshot));
    }
}

enum Approval {
    Proceed,
    ProceedWith(Map<String, Value>),
    Denied,
}

/// A failure rendered as the function response the model will see.
pub fn error_response(
    request: &ToolCallRequestInfo,
    message: String,
    error_type: ToolErrorType,
) -> ToolCallResponseInfo {
    ToolCallResponseInfo {
        call_id: request.call_id.clone(),
        response_parts: vec![Part::function_response(FunctionResponse {
            name: request.name.clone(),
            response: json!({"error": message}),
            id: Some(request.call_id.clone()),
        })],
        result_display: Some(message.clone()),
        error: Some(message),
        error_type: Some(error_type),
    }
}
