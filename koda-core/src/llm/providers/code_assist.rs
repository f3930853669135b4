//! OAuth'd code-assist backend.
//!
//! Identical wire shape to the native backend; the difference is credential
//! handling. Tokens are obtained out-of-band (the auth dialog is an external
//! collaborator), persisted under the app dir, refreshed when stale, and a
//! 401 mid-session triggers exactly one refresh-and-retry.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::constants::urls;
use crate::gemini::{
    CountTokensRequest, CountTokensResponse, GenerateContentRequest, GenerateContentResponse,
};
use crate::llm::provider::{ContentGenerator, ProviderError, ProviderStream, UserTier};
use crate::llm::providers::gemini::native_sse_stream;

/// Persisted OAuth token bundle (`~/.koda/oauth_creds.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthCredentials {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl OauthCredentials {
    fn is_stale(&self) -> bool {
        match self.expiry {
            // A minute of slack so we never send a token that dies in flight.
            Some(expiry) => expiry <= Utc::now() + Duration::seconds(60),
            None => false,
        }
    }
}

/// Disk-backed token store.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn load(&self) -> Option<OauthCredentials> {
        let raw = tokio::fs::read_to_string(&self.path).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn save(&self, credentials: &OauthCredentials) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(credentials)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

pub struct CodeAssistProvider {
    http: HttpClient,
    model: String,
    store: TokenStore,
    credentials: RwLock<Option<OauthCredentials>>,
    tier: Option<UserTier>,
}

impl CodeAssistProvider {
    pub fn new(model: impl Into<String>, store: TokenStore) -> Self {
        Self {
            http: HttpClient::new(),
            model: model.into(),
            store,
            credentials: RwLock::new(None),
            tier: Some(UserTier::Free),
        }
    }

    fn model_url(&self, method: &str, sse: bool) -> String {
        let alt = if sse { "?alt=sse" } else { "" };
        format!(
            "{}/models/{}:{method}{alt}",
            urls::GENERATIVE_LANGUAGE_BASE,
            self.model
        )
    }

    /// Current access token, refreshing first if the cached one is stale.
    async fn access_token(&self) -> Result<String, ProviderError> {
        {
            let cached = self.credentials.read().await;
            if let Some(creds) = cached.as_ref() {
                if !creds.is_stale() {
                    return Ok(creds.access_token.clone());
                }
            }
        }

        let mut slot = self.credentials.write().await;
        let loaded = match slot.clone() {
            Some(creds) => creds,
            None => self.store.load().await.ok_or_else(|| {
                ProviderError::Unauthorized("no stored OAuth credentials; run login".to_string())
            })?,
        };

        let fresh = if loaded.is_stale() {
            self.refresh(&loaded).await?
        } else {
            loaded
        };
        let token = fresh.access_token.clone();
        *slot = Some(fresh);
        Ok(token)
    }

    async fn refresh(
        &self,
        credentials: &OauthCredentials,
    ) -> Result<OauthCredentials, ProviderError> {
        let refresh_token = credentials.refresh_token.as_ref().ok_or_else(|| {
            ProviderError::Unauthorized("OAuth token expired and no refresh token".to_string())
        })?;

        debug!("refreshing code-assist access token");
        let response = self
            .http
            .post(urls::OAUTH_TOKEN_ENDPOINT)
            .form(&[
                ("client_id", urls::OAUTH_CLIENT_ID),
                ("client_secret", urls::OAUTH_CLIENT_SECRET),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unauthorized(format!(
                "token refresh failed ({status}): {body}"
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let access_token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::Unauthorized("token refresh response missing access_token".into())
            })?
            .to_string();
        let expires_in = payload
            .get("expires_in")
            .and_then(Value::as_i64)
            .unwrap_or(3600);

        let fresh = OauthCredentials {
            access_token,
            refresh_token: Some(refresh_token.clone()),
            expiry: Some(Utc::now() + Duration::seconds(expires_in)),
        };
        if let Err(err) = self.store.save(&fresh).await {
            warn!("failed to persist refreshed OAuth credentials: {err}");
        }
        Ok(fresh)
    }

    /// Drop the cached token so the next call re-reads or refreshes.
    async fn invalidate(&self) {
        let mut slot = self.credentials.write().await;
        if let Some(creds) = slot.as_mut() {
            creds.expiry = Some(Utc::now() - Duration::seconds(1));
        }
    }

    async fn send_authorized(
        &self,
        url: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, ProviderError> {
        for attempt in 0..2 {
            let token = self.access_token().await?;
            let response = self
                .http
                .post(url)
                .bearer_auth(&token)
                .json(body)
                .send()
                .await
                .map_err(|e| ProviderError::Network(e.to_string()))?;

            if response.status().as_u16() == 401 && attempt == 0 {
                debug!("code-assist request unauthorized; refreshing token once");
                self.invalidate().await;
                continue;
            }
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(status, body));
            }
            return Ok(response);
        }
        Err(ProviderError::Unauthorized(
            "code-assist request kept failing with 401 after refresh".to_string(),
        ))
    }
}

#[async_trait]
impl ContentGenerator for CodeAssistProvider {
    fn name(&self) -> &'static str {
        "code-assist"
    }

    async fn generate(
        &self,
        request: GenerateContentRequest,
        _prompt_id: &str,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let url = self.model_url("generateContent", false);
        let response = self.send_authorized(&url, &request).await?;
        response.json().await.map_err(|e| ProviderError::Api {
            message: format!("failed to parse response: {e}"),
            status: None,
        })
    }

    async fn generate_stream(
        &self,
        request: GenerateContentRequest,
        _prompt_id: &str,
    ) -> Result<ProviderStream, ProviderError> {
        let url = self.model_url("streamGenerateContent", true);
        let response = self.send_authorized(&url, &request).await?;
        Ok(native_sse_stream(response))
    }

    async fn count_tokens(&self, request: CountTokensRequest) -> Result<u64, ProviderError> {
        let url = self.model_url("countTokens", false);
        let response = self.send_authorized(&url, &request).await?;
        let counted: CountTokensResponse =
            response.json().await.map_err(|e| ProviderError::Api {
                message: format!("failed to parse response: {e}"),
                status: None,
            })?;
        Ok(counted.total_tokens)
    }

    async fn embed(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Unsupported("embed"))
    }

    fn user_tier(&self) -> Option<UserTier> {
        self.tier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_respects_slack_window() {
        let fresh = OauthCredentials {
            access_token: "a".into(),
            refresh_token: None,
            expiry: Some(Utc::now() + Duration::hours(1)),
        };
        assert!(!fresh.is_stale());

        let nearly = OauthCredentials {
            access_token: "a".into(),
            refresh_token: None,
            expiry: Some(Utc::now() + Duration::seconds(30)),
        };
        assert!(nearly.is_stale());

        let unbounded = OauthCredentials {
            access_token: "a".into(),
            refresh_token: None,
            expiry: None,
        };
        assert!(!unbounded.is_stale());
    }

    #[tokio::test]
    async fn token_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("creds.json"));
        assert!(store.load().await.is_none());

        let creds = OauthCredentials {
            access_token: "abc".into(),
            refresh_token: Some("r".into()),
            expiry: None,
        };
        store.save(&creds).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.access_token, "abc");
        assert_eq!(loaded.refresh_token.as_deref(), Some("r"));
    }
}
