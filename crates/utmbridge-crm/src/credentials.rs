//! Persisted access credentials.
//!
//! The record is a small JSON document:
//!
//! ```json
//! { "access_token": "...", "refresh_token": "..." }
//! ```
//!
//! `refresh_token` is optional (access-only mode). The file is read at the
//! start of every reconciliation and rewritten after every successful
//! refresh. Concurrent writers are not coordinated; the last write wins.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::CredentialError;
use crate::types::Credential;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the current credential. An empty `access_token` is an error.
    async fn load(&self) -> Result<Credential, CredentialError>;

    /// Replaces the stored credential.
    async fn save(&self, credential: &Credential) -> Result<(), CredentialError>;
}

/// Credential store backed by a JSON file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Credential, CredentialError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CredentialError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let credential: Credential =
            serde_json::from_str(&content).map_err(|e| CredentialError::Malformed {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        if credential.access_token.trim().is_empty() {
            return Err(CredentialError::MissingAccessToken);
        }
        Ok(credential)
    }

    async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        let content =
            serde_json::to_vec_pretty(credential).map_err(|e| CredentialError::Malformed {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &content))
            .await
            .map_err(std::io::Error::other)??;

        tracing::debug!(path = %self.path.display(), "Credentials persisted");
        Ok(())
    }
}

/// Writes into a uniquely named sibling temp file and renames it over `path`.
/// Concurrent writers never share a temp file; the last rename wins.
fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
