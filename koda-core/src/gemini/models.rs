use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::function_calling::{FunctionCall, FunctionCallingConfig, FunctionResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Content {
            role: "user".into(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Content {
            role: "model".into(),
            parts: vec![Part::text(text)],
        }
    }

    pub fn user_parts(parts: Vec<Part>) -> Self {
        Content {
            role: "user".into(),
            parts,
        }
    }

    pub fn model_parts(parts: Vec<Part>) -> Self {
        Content {
            role: "model".into(),
            parts,
        }
    }
}

/// Inline binary payload (base64 in `data`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
        /// Set by thinking-capable models on reasoning parts.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        thought: bool,
    },
    #[serde(rename_all = "camelCase")]
    FunctionCall { function_call: FunctionCall },
    #[serde(rename_all = "camelCase")]
    FunctionResponse { function_response: FunctionResponse },
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: Blob },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text {
            text: text.into(),
            thought: false,
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Part::FunctionCall {
            function_call: call,
        }
    }

    pub fn function_response(response: FunctionResponse) -> Self {
        Part::FunctionResponse {
            function_response: response,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_thought(&self) -> bool {
        matches!(self, Part::Text { thought: true, .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(rename = "functionCallingConfig")]
    pub function_calling_config: FunctionCallingConfig,
}

impl ToolConfig {
    pub fn auto() -> Self {
        Self {
            function_calling_config: FunctionCallingConfig::auto(),
        }
    }
}

/// System instruction: either a bare string or structured content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemInstruction {
    Text(String),
    Content(Content),
}

impl SystemInstruction {
    /// Flatten to plain text, concatenating part texts when structured.
    pub fn flattened(&self) -> String {
        match self {
            SystemInstruction::Text(text) => text.clone(),
            SystemInstruction::Content(content) => content
                .parts
                .iter()
                .filter_map(Part::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "toolConfig")]
    pub tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "generationConfig")]
    pub generation_config: Option<Value>,
}

impl GenerateContentRequest {
    pub fn new(contents: Vec<Content>) -> Self {
        Self {
            contents,
            tools: None,
            tool_config: None,
            system_instruction: None,
            generation_config: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Language,
    Blocklist,
    ProhibitedContent,
    Spii,
    MalformedFunctionCall,
    ImageSafety,
    UnexpectedToolCall,
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub total_token_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts_token_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Plain text of the first candidate, thought parts excluded.
    pub fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let content = candidate.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter(|part| !part.is_thought())
            .filter_map(Part::as_text)
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }

    /// All function calls in the first candidate, in backend order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        Part::FunctionCall { function_call } => Some(function_call),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates.first().and_then(|c| c.finish_reason)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTokensRequest {
    pub contents: Vec<Content>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountTokensResponse {
    pub total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn part_untagged_roundtrip() {
        let parts = vec![
            Part::text("hello"),
            Part::function_call(FunctionCall {
                name: "read_file".into(),
                args: json!({"path": "foo.txt"}),
                id: Some("t1".into()),
            }),
        ];
        let encoded = serde_json::to_string(&parts).unwrap();
        let decoded: Vec<Part> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(parts, decoded);
    }

    #[test]
    fn thought_flag_defaults_to_false() {
        let part: Part = serde_json::from_value(json!({"text": "plain"})).unwrap();
        assert!(!part.is_thought());
        let part: Part = serde_json::from_value(json!({"text": "hm", "thought": true})).unwrap();
        assert!(part.is_thought());
    }

    #[test]
    fn response_text_skips_thoughts() {
        let response = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content::model_parts(vec![
                    Part::Text {
                        text: "internal".into(),
                        thought: true,
                    },
                    Part::text("visible"),
                ])),
                finish_reason: Some(FinishReason::Stop),
                index: Some(0),
            }],
            usage_metadata: None,
        };
        assert_eq!(response.text().as_deref(), Some("visible"));
    }

    #[test]
    fn finish_reason_wire_names() {
        let reason: FinishReason = serde_json::from_value(json!("MAX_TOKENS")).unwrap();
        assert_eq!(reason, FinishReason::MaxTokens);
        let reason: FinishReason = serde_json::from_value(json!("STOP")).unwrap();
        assert_eq!(reason, FinishReason::Stop);
    }
}
