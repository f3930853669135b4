//! The turn engine: one outbound message, one backend stream, one finite
//! event stream out.

use std::collections::VecDeque;

use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::gemini::{GenerateContentRequest, GenerateContentResponse};
use crate::llm::provider::{ContentGenerator, ProviderError};

use super::events::{ThoughtSummary, ToolCallRequestInfo, TurnEvent};
use super::loop_detect::LoopDetector;

/// Raw responses kept for diagnostics when a turn fails.
const DEBUG_BUFFER_LEN: usize = 16;
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct Turn {
    generator: std::sync::Arc<dyn ContentGenerator>,
    prompt_id: String,
}

impl Turn {
    pub fn new(
        generator: std::sync::Arc<dyn ContentGenerator>,
        prompt_id: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            prompt_id: prompt_id.into(),
        }
    }

    /// Drive one backend request and emit events until the stream ends or the
    /// token fires. The returned stream is finite and non-restartable.
    pub fn run(
        self,
        request: GenerateContentRequest,
        token: CancellationToken,
    ) -> ReceiverStream<TurnEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            self.drive(request, token, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn drive(
        self,
        request: GenerateContentRequest,
        token: CancellationToken,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        let mut debug_responses: VecDeque<String> = VecDeque::with_capacity(DEBUG_BUFFER_LEN);

        let mut stream = match self
            .generator
            .generate_stream(request.clone(), &self.prompt_id)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.report_failure(&request, &debug_responses, &err, &token, &tx)
                    .await;
                return;
            }
        };

        let mut detector = LoopDetector::new();

        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let _ = tx.send(TurnEvent::UserCancelled).await;
                    return;
                }
                item = stream.next() => item,
            };

            let Some(item) = item else {
                return; // backend stream ended cleanly
            };

            let response = match item {
                Ok(response) => response,
                Err(err) => {
                    self.report_failure(&request, &debug_responses, &err, &token, &tx)
                        .await;
                    return;
                }
            };

            record_debug(&mut debug_responses, &response);

            if self
                .emit_response_events(&response, &mut detector, &tx)
                .await
                .is_err()
            {
                return; // receiver dropped or loop halt
            }
        }
    }

    /// Emit the events one raw response yields. `Err` stops the turn.
    async fn emit_response_events(
        &self,
        response: &GenerateContentResponse,
        detector: &mut LoopDetector,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), ()> {
        let first_part_is_thought = response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| content.parts.first())
            .map(|part| part.is_thought())
            .unwrap_or(false);

        if first_part_is_thought {
            let raw = response
                .candidates
                .first()
                .and_then(|c| c.content.as_ref())
                .and_then(|content| content.parts.first())
                .and_then(|part| part.as_text())
                .unwrap_or_default();
            let thought = ThoughtSummary::parse(raw);
            tx.send(TurnEvent::Thought(thought)).await.map_err(drop)?;
        } else if let Some(text) = response.text() {
            let looping = detector.observe_content(&text);
            tx.send(TurnEvent::Content(text)).await.map_err(drop)?;
            if looping {
                tx.send(TurnEvent::LoopDetected).await.map_err(drop)?;
                return Err(());
            }
        }

        for call in response.function_calls() {
            let args: Map<String, Value> = match &call.args {
                Value::Object(map) => map.clone(),
                Value::Null => Map::new(),
                other => {
                    debug!("coercing non-object tool args for '{}': {other}", call.name);
                    Map::new()
                }
            };
            let call_id = call
                .id
                .clone()
                .unwrap_or_else(|| synthesize_call_id(&call.name));

            let looping = detector.observe_tool_call(&call.name, &args);
            tx.send(TurnEvent::ToolCallRequest(ToolCallRequestInfo {
                call_id,
                name: call.name.clone(),
                args,
                is_client_initiated: false,
                prompt_id: self.prompt_id.clone(),
            }))
            .await
            .map_err(drop)?;
            if looping {
                tx.send(TurnEvent::LoopDetected).await.map_err(drop)?;
                return Err(());
            }
        }

        if let Some(reason) = response.finish_reason() {
            tx.send(TurnEvent::Finished(reason)).await.map_err(drop)?;
        }

        Ok(())
    }

    async fn report_failure(
        &self,
        request: &GenerateContentRequest,
        debug_responses: &VecDeque<String>,
        err: &ProviderError,
        token: &CancellationToken,
        tx: &mpsc::Sender<TurnEvent>,
    ) {
        if token.is_cancelled() {
            let _ = tx.send(TurnEvent::UserCancelled).await;
            return;
        }

        // Keep the request and the raw tail around for bug reports before
        // surfacing the error.
        error!(
            prompt_id = self.prompt_id,
            contents = request.contents.len(),
            recent_responses = ?debug_responses,
            "turn failed: {err}"
        );

        let _ = tx
            .send(TurnEvent::Error {
                message: err.to_string(),
                status: err.status(),
            })
            .await;
    }
}

fn record_debug(buffer: &mut VecDeque<String>, response: &GenerateContentResponse) {
    if buffer.len() == DEBUG_BUFFER_LEN {
        buffer.pop_front();
    }
    let rendered = serde_json::to_string(response).unwrap_or_else(|_| "<unserializable>".into());
    buffer.push_back(rendered);
}

/// `name-timestamp-random`, used when the backend omits a call id.
fn synthesize_call_id(name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let nonce: u32 = rand::random();
    format!("{name}-{millis}-{nonce:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{Candidate, Content, FinishReason, FunctionCall, Part};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct ScriptedGenerator {
        responses: Vec<Result<GenerateContentResponse, ProviderError>>,
    }

    #[async_trait]
    impl ContentGenerator for ScriptedGenerator {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(
            &self,
            _request: GenerateContentRequest,
            _prompt_id: &str,
        ) -> Result<GenerateContentResponse, ProviderError> {
            unimplemented!()
        }

        async fn generate_stream(
            &self,
            _request: GenerateContentRequest,
            _prompt_id: &str,
        ) -> Result<crate::llm::provider::ProviderStream, ProviderError> {
            let responses: Vec<_> = self
                .responses
                .iter()
                .map(|r| match r {
                    Ok(response) => Ok(response.clone()),
                    Err(ProviderError::Unauthorized(m)) => {
                        Err(ProviderError::Unauthorized(m.clone()))
                    }
                    Err(other) => Err(ProviderError::Api {
                        message: other.to_string(),
                        status: other.status(),
                    }),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(responses)))
        }

        async fn count_tokens(
            &self,
            _request: crate::gemini::CountTokensRequest,
        ) -> Result<u64, ProviderError> {
            Ok(0)
        }

        async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Unsupported("embed"))
        }
    }

    fn text_response(text: &str) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content::model_text(text)),
                finish_reason: None,
                index: Some(0),
            }],
            usage_metadata: None,
        }
    }

    fn finished_response(reason: FinishReason) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content::model_parts(vec![])),
                finish_reason: Some(reason),
                index: Some(0),
            }],
            usage_metadata: None,
        }
    }

    async fn run_turn(
        responses: Vec<Result<GenerateContentResponse, ProviderError>>,
    ) -> Vec<TurnEvent> {
        let generator = Arc::new(ScriptedGenerator { responses });
        let turn = Turn::new(generator, "session########1");
        let request = GenerateContentRequest::new(vec![Content::user_text("hi")]);
        turn.run(request, CancellationToken::new())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn content_then_finish() {
        let events = run_turn(vec![
            Ok(text_response("Hello")),
            Ok(text_response(" world")),
            Ok(finished_response(FinishReason::Stop)),
        ])
        .await;

        let texts: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                TurnEvent::Content(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["Hello", " world"]);
        assert!(matches!(
            events.last(),
            Some(TurnEvent::Finished(FinishReason::Stop))
        ));
    }

    #[tokio::test]
    async fn missing_call_id_is_synthesized() {
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content::model_parts(vec![Part::function_call(
                    FunctionCall {
                        name: "read_file".into(),
                        args: serde_json::json!({"path": "foo.txt"}),
                        id: None,
                    },
                )])),
                finish_reason: Some(FinishReason::Stop),
                index: Some(0),
            }],
            usage_metadata: None,
        };
        let events = run_turn(vec![Ok(response)]).await;

        let request = events
            .iter()
            .find_map(|e| match e {
                TurnEvent::ToolCallRequest(info) => Some(info),
                _ => None,
            })
            .expect("tool call request event");
        assert!(request.call_id.starts_with("read_file-"));
        assert!(!request.is_client_initiated);
        assert_eq!(request.prompt_id, "session########1");
    }

    #[tokio::test]
    async fn thought_parts_become_thought_events() {
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content::model_parts(vec![Part::Text {
                    text: "**Reading** scanning the file".into(),
                    thought: true,
                }])),
                finish_reason: None,
                index: Some(0),
            }],
            usage_metadata: None,
        };
        let events = run_turn(vec![Ok(response)]).await;
        assert!(matches!(
            &events[0],
            TurnEvent::Thought(t) if t.subject == "Reading"
        ));
    }

    #[tokio::test]
    async fn backend_error_carries_status() {
        let events = run_turn(vec![
            Ok(text_response("partial")),
            Err(ProviderError::Api {
                message: "boom".into(),
                status: Some(500),
            }),
        ])
        .await;
        assert!(matches!(
            events.last(),
            Some(TurnEvent::Error { status: Some(500), .. })
        ));
    }

    #[tokio::test]
    async fn cancellation_emits_user_cancelled() {
        let generator = Arc::new(ScriptedGenerator {
            responses: vec![Ok(text_response("a")), Ok(text_response("b"))],
        });
        let turn = Turn::new(generator, "p");
        let token = CancellationToken::new();
        token.cancel();
        let events = turn
            .run(
                GenerateContentRequest::new(vec![Content::user_text("hi")]),
                token,
            )
            .collect::<Vec<_>>()
            .await;
        assert!(matches!(events.as_slice(), [TurnEvent::UserCancelled]));
    }

    #[tokio::test]
    async fn repeated_identical_tool_calls_halt_the_turn() {
        let call = || {
            Ok(GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Some(Content::model_parts(vec![Part::function_call(
                        FunctionCall {
                            name: "grep".into(),
                            args: serde_json::json!({"pattern": "x"}),
                            id: Some("same".into()),
                        },
                    )])),
                    finish_reason: None,
                    index: Some(0),
                }],
                usage_metadata: None,
            })
        };
        let events = run_turn(vec![call(), call(), call(), call()]).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, TurnEvent::LoopDetected)));
        // The turn halted: three requests were emitted, not four.
        let requests = events
            .iter()
            .filter(|e| matches!(e, TurnEvent::ToolCallRequest(_)))
            .count();
        assert_eq!(requests, 3);
    }
}
