//! Token storage
//!
//! `TokenStore` is the seam between the refresh core and wherever the session
//! actually lives. The refresh endpoint writes new tokens through it, the
//! transport reads the access token from it at send time, and failure
//! escalation clears it.
//!
//! `FileTokenStore` persists with atomic temp-file + rename so a crash never
//! leaves a half-written session, and a tokio Mutex serializes writes from
//! concurrent refreshes and clears.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::tokens::{SessionTokens, StoredTokens};

/// Where the session's tokens live.
///
/// Uses `Pin<Box<dyn Future>>` return types so stores can be shared as
/// `Arc<dyn TokenStore>` across the transport, refresh endpoint and escalation.
pub trait TokenStore: Send + Sync {
    /// Snapshot of the current session, if any.
    fn tokens(&self) -> Pin<Box<dyn Future<Output = Option<SessionTokens>> + Send + '_>>;

    /// Replace the current session.
    fn store(&self, tokens: SessionTokens) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Drop the current session. Clearing an empty store is not an error.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn access_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.tokens().await.map(|t| t.access) })
    }

    fn refresh_token(&self) -> Pin<Box<dyn Future<Output = Option<Secret<String>>> + Send + '_>> {
        Box::pin(async move { self.tokens().await.and_then(|t| t.refresh) })
    }
}

/// In-process session store.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: RwLock<Option<SessionTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: SessionTokens) -> Self {
        Self {
            state: RwLock::new(Some(tokens)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn tokens(&self) -> Pin<Box<dyn Future<Output = Option<SessionTokens>> + Send + '_>> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn store(&self, tokens: SessionTokens) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = Some(tokens);
            debug!("stored session tokens");
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = None;
            debug!("cleared session tokens");
            Ok(())
        })
    }
}

/// Session store backed by a JSON file.
///
/// The in-memory copy is the read path; every mutation rewrites the file
/// while holding the lock. An empty session is persisted as `null`.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<Option<SessionTokens>>,
}

impl FileTokenStore {
    /// Load the session from `path`.
    ///
    /// If the file doesn't exist it is created holding `null` (no session).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let stored: Option<StoredTokens> = if contents.trim().is_empty() {
                None
            } else {
                serde_json::from_str(&contents)
                    .map_err(|e| Error::Parse(format!("parsing session file: {e}")))?
            };
            info!(path = %path.display(), has_session = stored.is_some(), "loaded session file");
            stored.map(SessionTokens::from)
        } else {
            info!(path = %path.display(), "session file not found, starting signed out");
            write_atomic(&path, None).await?;
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn tokens(&self) -> Pin<Box<dyn Future<Output = Option<SessionTokens>> + Send + '_>> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn store(&self, tokens: SessionTokens) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, Some(&tokens)).await?;
            *state = Some(tokens);
            debug!("stored session tokens");
            Ok(())
        })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, None).await?;
            *state = None;
            debug!("cleared session tokens");
            Ok(())
        })
    }
}

/// Write the session to `path` atomically with 0600 permissions (unix).
async fn write_atomic(path: &Path, tokens: Option<&SessionTokens>) -> Result<()> {
    let stored = tokens.map(StoredTokens::from);
    let json = serde_json::to_string_pretty(&stored)
        .map_err(|e| Error::Parse(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}
