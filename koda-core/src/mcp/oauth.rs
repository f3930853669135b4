//! OAuth fallback for MCP servers that answer 401/403 with a
//! `WWW-Authenticate` challenge.
//!
//! Discovery order: the `resource_metadata` URI named in the challenge, then
//! well-known probes derived from the server's base URL. The interactive
//! authorization step is an external collaborator behind [`AuthBrowser`];
//! this module owns challenge parsing, metadata discovery, the PKCE exchange
//! and token persistence.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use regex::Regex;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

const OAUTH_CLIENT_ID: &str = "koda-cli";
const REDIRECT_URI: &str = "http://localhost:7777/oauth/callback";

/// Pull the `WWW-Authenticate` value out of an error rendering. Transports
/// surface the header embedded in error text, so matching is ordered from the
/// most common shape to quoted variants.
pub fn extract_www_authenticate(raw: &str) -> Option<String> {
    let patterns = [
        r#"www-authenticate:\s*([^\n\r"]+)"#,
        r#"WWW-Authenticate:\s*([^\n\r"]+)"#,
        r#"www-authenticate"\s*:\s*"([^"]+)"#,
        r#"WWW-Authenticate"\s*:\s*"([^"]+)"#,
    ];
    for pattern in patterns {
        let regex = Regex::new(pattern).expect("static pattern");
        if let Some(captures) = regex.captures(raw) {
            let value = captures.get(1)?.as_str().trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// `resource_metadata="…"` parameter of a Bearer challenge.
pub fn parse_resource_metadata(header: &str) -> Option<String> {
    let regex = Regex::new(r#"resource_metadata="([^"]+)""#).expect("static pattern");
    regex
        .captures(header)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, Deserialize)]
pub struct OauthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

/// Persisted per-server tokens (`~/.koda/mcp_oauth_tokens.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTokenRecord {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

pub struct McpTokenStore {
    path: PathBuf,
}

impl McpTokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_location() -> Self {
        Self::new(crate::config::paths::app_dir().join("mcp_oauth_tokens.json"))
    }

    async fn read_all(&self) -> HashMap<String, McpTokenRecord> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    pub async fn get(&self, server: &str) -> Option<McpTokenRecord> {
        self.read_all().await.remove(server)
    }

    pub async fn put(&self, server: &str, record: McpTokenRecord) -> Result<()> {
        let mut all = self.read_all().await;
        all.insert(server.to_string(), record);
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&all)?)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

/// The interactive leg of the authorization-code flow: open the URL, return
/// the authorization code. Auth dialogs live outside the core.
#[async_trait::async_trait]
pub trait AuthBrowser: Send + Sync {
    async fn authorize(&self, authorization_url: &str) -> Result<String>;
}

struct PkcePair {
    verifier: String,
    challenge: String,
}

fn generate_pkce() -> PkcePair {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
    let mut rng = rand::thread_rng();
    let verifier: String = (0..64)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair {
        verifier,
        challenge,
    }
}

pub struct McpOauthFlow {
    http: HttpClient,
    browser: std::sync::Arc<dyn AuthBrowser>,
    store: McpTokenStore,
}

impl McpOauthFlow {
    pub fn new(browser: std::sync::Arc<dyn AuthBrowser>, store: McpTokenStore) -> Self {
        Self {
            http: HttpClient::new(),
            browser,
            store,
        }
    }

    /// Run the whole fallback: discover config, authorize, exchange, persist.
    /// Returns the bearer token for the reconnect.
    pub async fn authenticate(
        &self,
        server_name: &str,
        server_url: &str,
        www_authenticate: &str,
    ) -> Result<String> {
        if let Some(record) = self.store.get(server_name).await {
            debug!(server = server_name, "reusing persisted MCP OAuth token");
            return Ok(record.access_token);
        }

        let metadata = self
            .discover_metadata(server_url, www_authenticate)
            .await
            .context("OAuth configuration discovery failed")?;

        let pkce = generate_pkce();
        let scope = metadata.scopes_supported.join(" ");
        let mut authorization_url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256",
            metadata.authorization_endpoint, OAUTH_CLIENT_ID, REDIRECT_URI, pkce.challenge,
        );
        if !scope.is_empty() {
            authorization_url.push_str(&format!("&scope={}", urlencode(&scope)));
        }

        let code = self.browser.authorize(&authorization_url).await?;
        let token = self
            .exchange_code(&metadata.token_endpoint, &code, &pkce.verifier)
            .await?;

        if let Err(err) = self.store.put(server_name, token.clone()).await {
            warn!(server = server_name, "failed to persist MCP OAuth token: {err}");
        }
        Ok(token.access_token)
    }

    /// Spec'd discovery order: `resource_metadata` from the challenge first,
    /// then well-known probes against the server's origin.
    async fn discover_metadata(
        &self,
        server_url: &str,
        www_authenticate: &str,
    ) -> Result<OauthServerMetadata> {
        if let Some(metadata_url) = parse_resource_metadata(www_authenticate) {
            match self.metadata_from_resource(&metadata_url).await {
                Ok(metadata) => return Ok(metadata),
                Err(err) => warn!("resource_metadata discovery failed: {err}"),
            }
        }

        let base = base_url(server_url)?;
        match self
            .metadata_from_resource(&format!("{base}/.well-known/oauth-protected-resource"))
            .await
        {
            Ok(metadata) => Ok(metadata),
            Err(_) => {
                self.fetch_auth_server_metadata(&format!(
                    "{base}/.well-known/oauth-authorization-server"
                ))
                .await
            }
        }
    }

    /// Protected-resource metadata names its authorization servers; follow the
    /// first one to the real endpoints.
    async fn metadata_from_resource(&self, url: &str) -> Result<OauthServerMetadata> {
        let payload: Value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let auth_server = payload
            .get("authorization_servers")
            .and_then(Value::as_array)
            .and_then(|servers| servers.first())
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("no authorization_servers in {url}"))?;

        self.fetch_auth_server_metadata(&format!(
            "{}/.well-known/oauth-authorization-server",
            auth_server.trim_end_matches('/')
        ))
        .await
    }

    async fn fetch_auth_server_metadata(&self, url: &str) -> Result<OauthServerMetadata> {
        let metadata = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<OauthServerMetadata>()
            .await
            .with_context(|| format!("parsing OAuth metadata from {url}"))?;
        Ok(metadata)
    }

    async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        verifier: &str,
    ) -> Result<McpTokenRecord> {
        let response = self
            .http
            .post(token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("client_id", OAUTH_CLIENT_ID),
                ("code", code),
                ("code_verifier", verifier),
                ("redirect_uri", REDIRECT_URI),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("token exchange failed ({status}): {body}");
        }

        let payload: Value = response.json().await?;
        let access_token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("token response missing access_token"))?
            .to_string();
        let refresh_token = payload
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(McpTokenRecord {
            access_token,
            refresh_token,
        })
    }
}

fn base_url(server_url: &str) -> Result<String> {
    let parsed = Url::parse(server_url).with_context(|| format!("invalid URL {server_url}"))?;
    let mut base = format!(
        "{}://{}",
        parsed.scheme(),
        parsed.host_str().ok_or_else(|| anyhow!("URL has no host"))?
    );
    if let Some(port) = parsed.port() {
        base.push_str(&format!(":{port}"));
    }
    Ok(base)
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_header_from_error_text() {
        let raw = "request failed: 401 Unauthorized\nwww-authenticate: Bearer resource_metadata=\"https://x/.well-known/oauth\"";
        let header = extract_www_authenticate(raw).unwrap();
        assert!(header.starts_with("Bearer"));
    }

    #[test]
    fn extracts_capitalized_and_quoted_variants() {
        let raw = "WWW-Authenticate: Bearer realm=api";
        assert_eq!(
            extract_www_authenticate(raw).as_deref(),
            Some("Bearer realm=api")
        );

        let quoted = r#"{"www-authenticate": "Bearer realm=q"}"#;
        assert_eq!(
            extract_www_authenticate(quoted).as_deref(),
            Some("Bearer realm=q")
        );
    }

    #[test]
    fn parses_resource_metadata_uri() {
        let header = r#"Bearer resource_metadata="https://mcp.example.com/.well-known/oauth""#;
        assert_eq!(
            parse_resource_metadata(header).as_deref(),
            Some("https://mcp.example.com/.well-known/oauth")
        );
        assert!(parse_resource_metadata("Bearer realm=x").is_none());
    }

    #[test]
    fn base_url_strips_path_and_keeps_port() {
        assert_eq!(
            base_url("https://mcp.example.com:8443/v1/sse").unwrap(),
            "https://mcp.example.com:8443"
        );
        assert_eq!(
            base_url("http://host/path").unwrap(),
            "http://host"
        );
    }

    #[test]
    fn pkce_challenge_is_urlsafe_sha256_of_verifier() {
        let pkce = generate_pkce();
        assert_eq!(pkce.verifier.len(), 64);
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
        assert!(!pkce.challenge.contains('='));
    }

    #[tokio::test]
    async fn token_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = McpTokenStore::new(dir.path().join("tokens.json"));
        assert!(store.get("srv").await.is_none());
        store
            .put(
                "srv",
                McpTokenRecord {
                    access_token: "tok".into(),
                    refresh_token: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.get("srv").await.unwrap().access_token, "tok");
    }
}
