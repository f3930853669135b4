//! OpenAI-compatible router backend.
//!
//! Translates the native request records to `/chat/completions` and builds
//! native response records back from the router's replies, so the rest of the
//! core never sees the OpenAI wire shape.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde_json::{Value, json};
use tracing::warn;

use crate::config::constants::urls;
use crate::gemini::{
    Candidate, Content, CountTokensRequest, FinishReason, FunctionCall, GenerateContentRequest,
    GenerateContentResponse, Part, UsageMetadata,
};
use crate::llm::provider::{
    ContentGenerator, ProviderError, ProviderStream, estimate_tokens,
};
use crate::llm::sse::SseFrameBuffer;

/// Accumulates one `tool_calls[i]` entry across streaming deltas.
#[derive(Default, Clone)]
struct ToolCallBuilder {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallBuilder {
    fn finalize(self, fallback_index: usize) -> Option<FunctionCall> {
        let name = self.name?;
        let arguments = if self.arguments.is_empty() {
            "{}".to_string()
        } else {
            self.arguments
        };
        let args = serde_json::from_str(&arguments).unwrap_or_else(|err| {
            warn!("unparseable tool-call arguments for '{name}': {err}");
            json!({})
        });
        Some(FunctionCall {
            name,
            args,
            id: Some(
                self.id
                    .unwrap_or_else(|| format!("tool_call_{fallback_index}")),
            ),
        })
    }
}

fn update_tool_calls(builders: &mut Vec<ToolCallBuilder>, deltas: &[Value]) {
    for (position, delta) in deltas.iter().enumerate() {
        let index = delta
            .get("index")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(position);
        if builders.len() <= index {
            builders.resize_with(index + 1, ToolCallBuilder::default);
        }
        let builder = &mut builders[index];

        if let Some(id) = delta.get("id").and_then(Value::as_str) {
            builder.id = Some(id.to_string());
        }
        if let Some(function) = delta.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                builder.name = Some(name.to_string());
            }
            if let Some(arguments) = function.get("arguments") {
                if let Some(text) = arguments.as_str() {
                    builder.arguments.push_str(text);
                } else if arguments.is_object() || arguments.is_array() {
                    builder.arguments.push_str(&arguments.to_string());
                }
            }
        }
    }
}

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" | "tool_calls" => FinishReason::Stop,
        "length" => FinishReason::MaxTokens,
        "content_filter" => FinishReason::Safety,
        _ => FinishReason::Other,
    }
}

fn parse_usage(value: &Value) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: value
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        candidates_token_count: value
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        total_token_count: value
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        thoughts_token_count: None,
    }
}

/// Wrap accumulated state into a native response record. Function-call parts
/// are ordered before text.
fn build_response(
    text: Option<String>,
    calls: Vec<FunctionCall>,
    finish_reason: Option<FinishReason>,
    usage_metadata: Option<UsageMetadata>,
) -> GenerateContentResponse {
    let mut parts: Vec<Part> = calls.into_iter().map(Part::function_call).collect();
    if let Some(text) = text {
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
    }
    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Some(Content::model_parts(parts)),
            finish_reason,
            index: Some(0),
        }],
        usage_metadata,
    }
}

pub struct OpenRouterProvider {
    api_key: String,
    http: HttpClient,
    base_url: String,
    model: String,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        Self {
            api_key,
            http: HttpClient::new(),
            base_url: urls::OPENROUTER_API_BASE.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn convert_request(&self, request: &GenerateContentRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();

        if let Some(system) = &request.system_instruction {
            messages.push(json!({
                "role": "system",
                "content": system.flattened(),
            }));
        }

        for content in &request.contents {
            push_messages_for_content(&mut messages, content);
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });

        if let Some(tools) = &request.tools {
            let declarations: Vec<Value> = tools
                .iter()
                .flat_map(|tool| &tool.function_declarations)
                .map(|decl| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": decl.name,
                            "description": decl.description,
                            "parameters": decl.parameters,
                        },
                    })
                })
                .collect();
            if !declarations.is_empty() {
                body["tools"] = Value::Array(declarations);
            }
        }

        body
    }

    fn parse_completion(&self, payload: Value) -> Result<GenerateContentResponse, ProviderError> {
        let choices = payload
            .get("choices")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::Api {
                message: "router response missing choices".to_string(),
                status: None,
            })?;
        let choice = choices.first().ok_or_else(|| ProviderError::Api {
            message: "router response has no choices".to_string(),
            status: None,
        })?;
        let message = choice.get("message").ok_or_else(|| ProviderError::Api {
            message: "router response missing message".to_string(),
            status: None,
        })?;

        let text = match message.get("content") {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Array(parts)) => {
                let joined: String = parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                (!joined.is_empty()).then_some(joined)
            }
            _ => None,
        };

        let calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|entries| {
                let mut builders: Vec<ToolCallBuilder> = Vec::new();
                update_tool_calls(&mut builders, entries);
                builders
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, b)| b.finalize(i))
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(map_finish_reason);
        let usage = payload.get("usage").map(parse_usage);

        Ok(build_response(text, calls, finish_reason, usage))
    }

    async fn post_completions(
        &self,
        body: &Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", urls::ROUTER_REFERER)
            .header("X-Title", urls::ROUTER_TITLE)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }
        Ok(response)
    }
}

/// One native `Content` may fan out into several router messages: tool
/// responses get their own `role:"tool"` entries keyed by call id.
fn push_messages_for_content(messages: &mut Vec<Value>, content: &Content) {
    let role = match content.role.as_str() {
        "model" => "assistant",
        other => other,
    };

    let mut text = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    for part in &content.parts {
        match part {
            Part::Text { text: t, .. } => text.push_str(t),
            Part::FunctionCall { function_call } => {
                tool_calls.push(json!({
                    "id": function_call.id.clone().unwrap_or_default(),
                    "type": "function",
                    "function": {
                        "name": function_call.name,
                        "arguments": function_call.args.to_string(),
                    },
                }));
            }
            Part::FunctionResponse { function_response } => {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": function_response.id.clone().unwrap_or_default(),
                    "content": function_response.response.to_string(),
                }));
            }
            Part::InlineData { .. } => {}
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return;
    }

    let mut message = json!({
        "role": role,
        "content": text,
    });
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    messages.push(message);
}

#[async_trait]
impl ContentGenerator for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn generate(
        &self,
        request: GenerateContentRequest,
        _prompt_id: &str,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let body = self.convert_request(&request, false);
        let response = self.post_completions(&body).await?;
        let payload: Value = response.json().await.map_err(|e| ProviderError::Api {
            message: format!("failed to parse router response: {e}"),
            status: None,
        })?;
        self.parse_completion(payload)
    }

    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
        _prompt_id: &str,
    ) -> Result<ProviderStream, ProviderError> {
        let body = self.convert_request(&request, true);
        let response = self.post_completions(&body).await?;

        let stream = try_stream! {
            let mut body_stream = response.bytes_stream();
            let mut frames = SseFrameBuffer::new();
            let mut builders: Vec<ToolCallBuilder> = Vec::new();
            let mut finish_reason: Option<FinishReason> = None;
            let mut usage: Option<UsageMetadata> = None;
            let mut done = false;

            'outer: while let Some(chunk) = body_stream.next().await {
                let chunk = chunk.map_err(|e| ProviderError::Network(e.to_string()))?;
                for payload in frames.push(&chunk) {
                    if payload.is_done_sentinel() {
                        done = true;
                        break 'outer;
                    }
                    // Malformed frames are skipped, not fatal.
                    let Ok(value) = serde_json::from_str::<Value>(payload.data()) else {
                        warn!("skipping malformed stream frame");
                        continue;
                    };
                    if let Some(delta) =
                        apply_stream_chunk(&value, &mut builders, &mut finish_reason, &mut usage)
                    {
                        yield build_response(Some(delta), Vec::new(), None, None);
                    }
                }
            }

            if !done {
                if let Some(payload) = frames.flush() {
                    if !payload.is_done_sentinel() {
                        if let Ok(value) = serde_json::from_str::<Value>(payload.data()) {
                            if let Some(delta) = apply_stream_chunk(
                                &value,
                                &mut builders,
                                &mut finish_reason,
                                &mut usage,
                            ) {
                                yield build_response(Some(delta), Vec::new(), None, None);
                            }
                        }
                    }
                }
            }

            let calls: Vec<FunctionCall> = builders
                .into_iter()
                .enumerate()
                .filter_map(|(i, b)| b.finalize(i))
                .collect();
            yield build_response(
                None,
                calls,
                Some(finish_reason.unwrap_or(FinishReason::Stop)),
                usage,
            );
        };

        Ok(Box::pin(stream))
    }

    async fn count_tokens(&self, request: CountTokensRequest) -> Result<u64, ProviderError> {
        // The router exposes no counter; chars/4 is the documented stand-in.
        let mut total = 0;
        for content in &request.contents {
            for part in &content.parts {
                if let Some(text) = part.as_text() {
                    total += estimate_tokens(text);
                }
            }
        }
        Ok(total)
    }

    async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Unsupported("embed"))
    }
}

/// Fold one stream chunk into the accumulators; returns any text delta.
fn apply_stream_chunk(
    value: &Value,
    builders: &mut Vec<ToolCallBuilder>,
    finish_reason: &mut Option<FinishReason>,
    usage: &mut Option<UsageMetadata>,
) -> Option<String> {
    if let Some(usage_value) = value.get("usage") {
        *usage = Some(parse_usage(usage_value));
    }

    let choice = value.get("choices").and_then(Value::as_array)?.first()?;

    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
        *finish_reason = Some(map_finish_reason(reason));
    }

    let delta = choice.get("delta")?;
    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        update_tool_calls(builders, tool_calls);
    }

    let text = delta.get("content").and_then(Value::as_str)?;
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{FunctionDeclaration, FunctionResponse, SystemInstruction, Tool};

    fn provider() -> OpenRouterProvider {
        OpenRouterProvider::new("test-key".into(), "qwen/qwen3-coder")
    }

    #[test]
    fn converts_roles_and_system_instruction() {
        let request = GenerateContentRequest {
            contents: vec![
                Content::user_text("hi"),
                Content::model_text("hello there"),
            ],
            tools: None,
            tool_config: None,
            system_instruction: Some(SystemInstruction::Text("be brief".into())),
            generation_config: None,
        };
        let body = provider().convert_request(&request, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be brief");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
    }

    #[test]
    fn tool_responses_become_tool_messages() {
        let request = GenerateContentRequest::new(vec![Content::user_parts(vec![
            Part::function_response(FunctionResponse {
                name: "read_file".into(),
                response: json!({"output": "data"}),
                id: Some("t1".into()),
            }),
        ])]);
        let body = provider().convert_request(&request, false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "tool");
        assert_eq!(messages[0]["tool_call_id"], "t1");
    }

    #[test]
    fn declarations_map_to_function_tools() {
        let request = GenerateContentRequest {
            contents: vec![Content::user_text("go")],
            tools: Some(vec![Tool {
                function_declarations: vec![FunctionDeclaration {
                    name: "grep".into(),
                    description: "search".into(),
                    parameters: json!({"type": "object"}),
                }],
            }]),
            tool_config: None,
            system_instruction: None,
            generation_config: None,
        };
        let body = provider().convert_request(&request, false);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "grep");
    }

    #[test]
    fn completion_parsing_orders_calls_before_text() {
        let payload = json!({
            "choices": [{
                "message": {
                    "content": "done",
                    "tool_calls": [{
                        "id": "c1",
                        "function": {"name": "write_file", "arguments": "{\"path\":\"a\"}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8},
        });
        let response = provider().parse_completion(payload).unwrap();
        let parts = &response.candidates[0].content.as_ref().unwrap().parts;
        assert!(matches!(parts[0], Part::FunctionCall { .. }));
        assert_eq!(parts[1].as_text(), Some("done"));
        assert_eq!(response.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(response.usage_metadata.as_ref().unwrap().total_token_count, 8);
    }

    #[test]
    fn empty_arguments_default_to_empty_object() {
        let builder = ToolCallBuilder {
            id: None,
            name: Some("list".into()),
            arguments: String::new(),
        };
        let call = builder.finalize(2).unwrap();
        assert_eq!(call.args, json!({}));
        assert_eq!(call.id.as_deref(), Some("tool_call_2"));
    }

    #[tokio::test]
    async fn count_tokens_uses_estimate() {
        let request = CountTokensRequest {
            contents: vec![Content::user_text("abcdefgh")],
        };
        assert_eq!(provider().count_tokens(request).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn embed_is_unsupported() {
        let err = provider().embed(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }
}
