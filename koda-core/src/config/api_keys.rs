//! Credential resolution: environment first, then the app-level `.env` file.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};

use super::constants::env_vars;
use super::paths;
use crate::llm::provider::AuthKind;

/// Look a key up in the process environment, then in `~/.koda/.env`.
fn lookup(name: &str) -> Option<String> {
    if let Ok(value) = env::var(name) {
        if !value.trim().is_empty() {
            return Some(value);
        }
    }
    lookup_env_file(&paths::env_file_path(), name)
}

fn lookup_env_file(path: &Path, name: &str) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == name {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

pub fn gemini_api_key() -> Option<String> {
    lookup(env_vars::GEMINI_API_KEY).or_else(|| lookup(env_vars::GOOGLE_API_KEY))
}

pub fn openrouter_api_key() -> Option<String> {
    lookup(env_vars::OPENROUTER_API_KEY)
}

#[derive(Debug, Clone)]
pub struct VertexEnv {
    pub api_key: String,
    pub project: String,
    pub location: String,
}

pub fn vertex_env() -> Option<VertexEnv> {
    Some(VertexEnv {
        api_key: lookup(env_vars::GOOGLE_API_KEY)?,
        project: lookup(env_vars::GOOGLE_CLOUD_PROJECT)?,
        location: lookup(env_vars::GOOGLE_CLOUD_LOCATION)?,
    })
}

/// Startup auth preselection via `KODA_DEFAULT_AUTH_TYPE`.
pub fn default_auth_kind() -> Option<AuthKind> {
    let value = env::var(env_vars::DEFAULT_AUTH_TYPE).ok()?;
    AuthKind::parse(value.trim())
}

/// Write `KEY=value` into the app `.env` file, replacing an existing line for
/// the same key in place and appending otherwise.
pub fn persist_env_key(name: &str, value: &str) -> Result<()> {
    persist_env_key_at(&paths::env_file_path(), name, value)
}

fn persist_env_key_at(path: &Path, name: &str, value: &str) -> Result<()> {
    let existing = std::fs::read_to_string(path).unwrap_or_default();
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;

    for line in existing.lines() {
        let is_target = line
            .split_once('=')
            .map(|(key, _)| key.trim() == name)
            .unwrap_or(false);
        if is_target {
            lines.push(format!("{name}={value}"));
            replaced = true;
        } else {
            lines.push(line.to_string());
        }
    }
    if !replaced {
        lines.push(format!("{name}={value}"));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_lookup_ignores_comments_and_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "# creds\nGEMINI_API_KEY=\"abc123\"\nOTHER=x\n").unwrap();
        assert_eq!(
            lookup_env_file(&path, "GEMINI_API_KEY").as_deref(),
            Some("abc123")
        );
        assert_eq!(lookup_env_file(&path, "MISSING"), None);
    }

    #[test]
    fn persist_replaces_existing_line_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "A=1\nGEMINI_API_KEY=old\nB=2\n").unwrap();

        persist_env_key_at(&path, "GEMINI_API_KEY", "new").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "A=1\nGEMINI_API_KEY=new\nB=2\n");

        persist_env_key_at(&path, "C", "3").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("C=3\n"));
    }

    #[test]
    fn persist_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".env");
        persist_env_key_at(&path, "KEY", "v").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "KEY=v\n");
    }
}
