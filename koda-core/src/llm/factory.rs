//! Backend construction from auth kind + environment.

use std::sync::Arc;

use tracing::info;

use crate::config::api_keys;
use crate::config::paths;
use crate::llm::provider::{AuthKind, ContentGenerator, ProviderError};
use crate::llm::providers::{
    CodeAssistProvider, GeminiEndpoint, GeminiProvider, OpenRouterProvider, TokenStore,
};

/// Pick an auth kind when none was configured: the startup env override wins,
/// then whichever credential is actually present.
pub fn resolve_auth_kind(preferred: Option<AuthKind>) -> AuthKind {
    if let Some(kind) = preferred {
        return kind;
    }
    if let Some(kind) = api_keys::default_auth_kind() {
        return kind;
    }
    if api_keys::gemini_api_key().is_some() {
        if api_keys::vertex_env().is_some() {
            return AuthKind::VertexAi;
        }
        return AuthKind::ApiKey;
    }
    if api_keys::openrouter_api_key().is_some() {
        return AuthKind::OpenRouter;
    }
    AuthKind::CodeAssist
}

pub fn create_generator(
    auth: AuthKind,
    model: &str,
) -> Result<Arc<dyn ContentGenerator>, ProviderError> {
    info!(auth = auth.as_str(), model, "creating content generator");
    match auth {
        AuthKind::ApiKey => {
            let api_key = api_keys::gemini_api_key().ok_or_else(|| {
                ProviderError::Unauthorized(
                    "GEMINI_API_KEY (or GOOGLE_API_KEY) is not set".to_string(),
                )
            })?;
            Ok(Arc::new(GeminiProvider::new(
                GeminiEndpoint::ApiKey { api_key },
                model,
            )))
        }
        AuthKind::VertexAi => {
            let vertex = api_keys::vertex_env().ok_or_else(|| {
                ProviderError::Unauthorized(
                    "Vertex auth needs GOOGLE_API_KEY, GOOGLE_CLOUD_PROJECT and GOOGLE_CLOUD_LOCATION"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(GeminiProvider::new(
                GeminiEndpoint::Vertex {
                    api_key: vertex.api_key,
                    project: vertex.project,
                    location: vertex.location,
                },
                model,
            )))
        }
        AuthKind::CodeAssist => Ok(Arc::new(CodeAssistProvider::new(
            model,
            TokenStore::new(paths::oauth_credentials_path()),
        ))),
        AuthKind::OpenRouter => {
            let api_key = api_keys::openrouter_api_key().ok_or_else(|| {
                ProviderError::Unauthorized("OPENROUTER_API_KEY is not set".to_string())
            })?;
            Ok(Arc::new(OpenRouterProvider::new(api_key, model)))
        }
    }
}
