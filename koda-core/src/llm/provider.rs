//! Uniform contract over the supported LLM backends.
//!
//! Every backend, whatever its wire protocol, implements [`ContentGenerator`]
//! and speaks the native record types from [`crate::gemini`]. Capability gaps
//! are expressed through [`ProviderError::Unsupported`] rather than separate
//! traits.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::gemini::{CountTokensRequest, GenerateContentRequest, GenerateContentResponse};

/// Which credential scheme backs the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Native API with `GEMINI_API_KEY` / `GOOGLE_API_KEY`.
    ApiKey,
    /// Vertex-style endpoint selected by `GOOGLE_CLOUD_PROJECT` + `GOOGLE_CLOUD_LOCATION`.
    VertexAi,
    /// OAuth'd code-assist endpoint with a persisted token.
    CodeAssist,
    /// OpenAI-compatible router with `OPENROUTER_API_KEY`.
    OpenRouter,
}

impl AuthKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::ApiKey => "api-key",
            AuthKind::VertexAi => "vertex-ai",
            AuthKind::CodeAssist => "code-assist",
            AuthKind::OpenRouter => "openrouter",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "api-key" => Some(AuthKind::ApiKey),
            "vertex-ai" => Some(AuthKind::VertexAi),
            "code-assist" => Some(AuthKind::CodeAssist),
            "openrouter" => Some(AuthKind::OpenRouter),
            _ => None,
        }
    }
}

/// Subscription tier reported by backends that distinguish one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTier {
    Free,
    Legacy,
    Standard,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Unauthorized(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("{message}")]
    Api { message: String, status: Option<u16> },
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Classify an HTTP error status, preserving the numeric code for
    /// quota-fallback decisions downstream.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::Unauthorized(body),
            429 => ProviderError::QuotaExceeded(body),
            _ => ProviderError::Api {
                message: body,
                status: Some(status),
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Unauthorized(_) => Some(401),
            ProviderError::QuotaExceeded(_) => Some(429),
            ProviderError::Api { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ProviderError::Unauthorized(_))
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, ProviderError::QuotaExceeded(_))
    }
}

pub type ProviderStream =
    Pin<Box<dyn Stream<Item = Result<GenerateContentResponse, ProviderError>> + Send>>;

/// One backend behind the agent loop.
///
/// `generate_stream` is the primary operation; `generate` exists for the
/// one-shot paths (compression summaries, next-speaker checks) that want a
/// single consolidated response.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        request: GenerateContentRequest,
        prompt_id: &str,
    ) -> Result<GenerateContentResponse, ProviderError>;

    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
        prompt_id: &str,
    ) -> Result<ProviderStream, ProviderError>;

    async fn count_tokens(&self, request: CountTokensRequest) -> Result<u64, ProviderError>;

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError>;

    fn user_tier(&self) -> Option<UserTier> {
        None
    }
}

/// chars/4 stand-in for backends without a token counter. Quota decisions
/// must not depend on it.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ProviderError::from_status(401, "no".into()).is_unauthorized());
        assert!(ProviderError::from_status(403, "no".into()).is_unauthorized());
        assert!(ProviderError::from_status(429, "slow down".into()).is_quota());
        let err = ProviderError::from_status(503, "unavailable".into());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn auth_kind_parse_roundtrip() {
        for kind in [
            AuthKind::ApiKey,
            AuthKind::VertexAi,
            AuthKind::CodeAssist,
            AuthKind::OpenRouter,
        ] {
            assert_eq!(AuthKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AuthKind::parse("password"), None);
    }
}
