//! Filesystem locations owned by the app: the home-level app dir and the
//! per-project temp dir.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::constants::APP_DIR_NAME;

/// `~/.koda`, created on demand.
pub fn app_dir() -> PathBuf {
    home::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn oauth_credentials_path() -> PathBuf {
    app_dir().join("oauth_creds.json")
}

pub fn env_file_path() -> PathBuf {
    app_dir().join(".env")
}

/// Anonymous installation id, minted on first run and stable afterwards.
pub fn installation_id() -> Result<String> {
    let path = app_dir().join("installation_id");
    if let Ok(existing) = std::fs::read_to_string(&path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating app dir {}", parent.display()))?;
    }
    std::fs::write(&path, &id)
        .with_context(|| format!("writing installation id to {}", path.display()))?;
    Ok(id)
}

/// Per-project scratch space under the app dir, keyed by a digest of the
/// workspace path so unrelated checkouts never collide.
pub fn project_temp_dir(workspace: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(workspace.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let key: String = digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    app_dir().join("tmp").join(key)
}

pub fn checkpoints_dir(project_temp: &Path) -> PathBuf {
    project_temp.join("checkpoints")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_temp_dirs_differ_per_workspace() {
        let a = project_temp_dir(Path::new("/work/alpha"));
        let b = project_temp_dir(Path::new("/work/beta"));
        assert_ne!(a, b);
        assert_eq!(a, project_temp_dir(Path::new("/work/alpha")));
    }
}
