//! Native generative-language backend (API key or Vertex-style endpoint).
//!
//! A thin pass-through: requests and responses are already in the native
//! record shape, so this backend only does HTTP and SSE framing.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use tracing::warn;

use crate::config::constants::urls;
use crate::gemini::{
    CountTokensRequest, CountTokensResponse, GenerateContentRequest, GenerateContentResponse,
};
use crate::llm::provider::{ContentGenerator, ProviderError, ProviderStream};
use crate::llm::sse::SseFrameBuffer;

/// Endpoint flavor for the native backend.
#[derive(Debug, Clone)]
pub enum GeminiEndpoint {
    /// `generativelanguage.googleapis.com` with a `key` query parameter.
    ApiKey { api_key: String },
    /// Vertex-style base URL derived from project and location.
    Vertex {
        api_key: String,
        project: String,
        location: String,
    },
}

/// Decode a native `alt=sse` body into a stream of response records.
///
/// Shared with the code-assist backend, whose wire shape is identical once
/// authentication differences are behind it.
pub(crate) fn native_sse_stream(response: reqwest::Response) -> ProviderStream {
    let stream = try_stream! {
        let mut body_stream = response.bytes_stream();
        let mut frames = SseFrameBuffer::new();

        while let Some(chunk) = body_stream.next().await {
            let chunk = chunk.map_err(|e| ProviderError::Network(e.to_string()))?;
            for payload in frames.push(&chunk) {
                if payload.is_done_sentinel() {
                    return;
                }
                match serde_json::from_str::<GenerateContentResponse>(payload.data()) {
                    Ok(response) => yield response,
                    Err(err) => {
                        Err(ProviderError::Api {
                            message: format!("malformed stream frame: {err}"),
                            status: None,
                        })?;
                    }
                }
            }
        }

        if let Some(payload) = frames.flush() {
            if !payload.is_done_sentinel() {
                match serde_json::from_str::<GenerateContentResponse>(payload.data()) {
                    Ok(response) => yield response,
                    Err(err) => warn!("dropping trailing partial frame: {err}"),
                }
            }
        }
    };

    Box::pin(stream)
}

pub struct GeminiProvider {
    http: HttpClient,
    endpoint: GeminiEndpoint,
    model: String,
}

impl GeminiProvider {
    pub fn new(endpoint: GeminiEndpoint, model: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            endpoint,
            model: model.into(),
        }
    }

    pub fn with_http(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    fn model_url(&self, method: &str, sse: bool) -> String {
        let (base, key) = match &self.endpoint {
            GeminiEndpoint::ApiKey { api_key } => {
                (format!("{}/models", urls::GENERATIVE_LANGUAGE_BASE), api_key)
            }
            GeminiEndpoint::Vertex {
                api_key,
                project,
                location,
            } => (
                format!(
                    "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models"
                ),
                api_key,
            ),
        };
        let alt = if sse { "&alt=sse" } else { "" };
        format!("{base}/{}:{method}?key={key}{alt}", self.model)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &impl serde::Serialize,
    ) -> Result<T, ProviderError> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Api {
                message: format!("failed to parse response: {e}"),
                status: None,
            })
    }
}

#[async_trait]
impl ContentGenerator for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(
        &self,
        request: GenerateContentRequest,
        _prompt_id: &str,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let url = self.model_url("generateContent", false);
        self.post_json(&url, &request).await
    }

    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
        _prompt_id: &str,
    ) -> Result<ProviderStream, ProviderError> {
        let url = self.model_url("streamGenerateContent", true);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        Ok(native_sse_stream(response))
    }

    async fn count_tokens(&self, request: CountTokensRequest) -> Result<u64, ProviderError> {
        let url = self.model_url("countTokens", false);
        let response: CountTokensResponse = self.post_json(&url, &request).await?;
        Ok(response.total_tokens)
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        #[derive(serde::Deserialize)]
        struct EmbedResponse {
            embeddings: Vec<EmbeddingValues>,
        }
        #[derive(serde::Deserialize)]
        struct EmbeddingValues {
            values: Vec<f32>,
        }

        let key = match &self.endpoint {
            GeminiEndpoint::ApiKey { api_key } => api_key,
            GeminiEndpoint::Vertex { .. } => {
                return Err(ProviderError::Unsupported("embed"));
            }
        };
        let model = urls::EMBEDDING_MODEL;
        let url = format!(
            "{}/models/{model}:batchEmbedContents?key={key}",
            urls::GENERATIVE_LANGUAGE_BASE
        );
        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{model}"),
                    "content": {"parts": [{"text": text}]},
                })
            })
            .collect();

        let response: EmbedResponse = self
            .post_json(&url, &serde_json::json!({ "requests": requests }))
            .await?;
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}
