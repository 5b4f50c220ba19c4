use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{PanelError, PanelResult};

/// Identity behind an opaque session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Token → identity lookup. The panel only ever asks "who owns this token".
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn user_by_token(&self, token: &str) -> PanelResult<Option<UserIdentity>>;
}

/// Reads `tokens.json` (`{"<token>": {"id": "...", "username": "..."}}`)
/// on every lookup so revocations on disk take effect for new connections.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn user_by_token(&self, token: &str) -> PanelResult<Option<UserIdentity>> {
        if token.trim().is_empty() {
            return Ok(None);
        }

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("Token store {:?} missing, rejecting token", self.path);
                return Ok(None);
            }
            Err(source) => return Err(PanelError::io(&self.path, source)),
        };

        let tokens: HashMap<String, UserIdentity> = serde_json::from_slice(&bytes)?;
        Ok(tokens.get(token).cloned())
    }
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    tokens: HashMap<String, UserIdentity>,
}

impl MemoryCredentialStore {
    pub fn with_token(mut self, token: &str, id: &str) -> Self {
        self.tokens.insert(
            token.to_string(),
            UserIdentity {
                id: id.to_string(),
                username: None,
            },
        );
        self
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn user_by_token(&self, token: &str) -> PanelResult<Option<UserIdentity>> {
        Ok(self.tokens.get(token).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_resolves_known_tokens_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"abc":{"id":"7","username":"steve"}}"#).unwrap();
        let store = FileCredentialStore::new(path);

        let user = store.user_by_token("abc").await.unwrap().unwrap();
        assert_eq!(user.id, "7");
        assert_eq!(user.username.as_deref(), Some("steve"));
        assert!(store.user_by_token("nope").await.unwrap().is_none());
        assert!(store.user_by_token("  ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_token_file_rejects_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("absent.json"));

        assert!(store.user_by_token("abc").await.unwrap().is_none());
    }
}
