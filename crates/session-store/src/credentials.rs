//! Credential storage for the API session
//!
//! `Credentials` is only ever whole: both tokens present, or no value at all.
//! A persisted record carrying a single token is treated as logged out.
//!
//! `FileCredentialStore` keeps the three well-known keys in one JSON file.
//! All writes use atomic temp-file + rename; a tokio Mutex serializes writes
//! from login, refresh and logout paths.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::TokenPair;

/// Boxed future returned by `CredentialStore` methods (keeps the trait dyn-compatible).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The current session: bearer token, refresh token and cached user profile.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub profile: Option<serde_json::Value>,
}

impl Credentials {
    pub fn new(tokens: TokenPair, profile: Option<serde_json::Value>) -> Self {
        Self {
            access_token: Secret::new(tokens.access_token),
            refresh_token: Secret::new(tokens.refresh_token),
            profile,
        }
    }
}

/// Key-value store for the session credentials.
///
/// Read on every outgoing request, written on login and refresh success,
/// cleared on logout and refresh failure.
pub trait CredentialStore: Send + Sync {
    /// Current credentials, or `None` when logged out.
    fn get(&self) -> StoreFuture<'_, Option<Credentials>>;

    /// Replace all three keys.
    fn set(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>>;

    /// Remove all three keys together.
    fn clear(&self) -> StoreFuture<'_, Result<()>>;

    /// Swap in a refreshed token pair, keeping the cached profile.
    fn update_tokens(&self, tokens: TokenPair) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let profile = self.get().await.and_then(|c| c.profile);
            self.set(Credentials::new(tokens, profile)).await
        })
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: RwLock<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session.
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            state: RwLock::new(Some(credentials)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> StoreFuture<'_, Option<Credentials>> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn set(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = Some(credentials);
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.write().await = None;
            Ok(())
        })
    }
}

/// On-disk layout: the three well-known keys, each optional.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<serde_json::Value>,
}

impl StoredSession {
    fn from_credentials(credentials: &Credentials) -> Self {
        Self {
            access_token: Some(credentials.access_token.expose().clone()),
            refresh_token: Some(credentials.refresh_token.expose().clone()),
            user: credentials.profile.clone(),
        }
    }

    fn into_credentials(self, path: &Path) -> Option<Credentials> {
        match (self.access_token, self.refresh_token) {
            (Some(access), Some(refresh)) => Some(Credentials::new(
                TokenPair {
                    access_token: access,
                    refresh_token: refresh,
                },
                self.user,
            )),
            (None, None) => None,
            _ => {
                warn!(path = %path.display(), "credential file holds only one token, treating as logged out");
                None
            }
        }
    }
}

/// JSON-file backed store.
///
/// The file is read once at `open`; reads afterwards are served from memory.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Option<Credentials>>,
}

impl FileCredentialStore {
    /// Load credentials from the given file path.
    ///
    /// A missing file means no session; the file is created on the first `set`.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let stored: StoredSession = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            let credentials = stored.into_credentials(&path);
            info!(path = %path.display(), logged_in = credentials.is_some(), "loaded credentials");
            credentials
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> StoreFuture<'_, Option<Credentials>> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn set(&self, credentials: Credentials) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let stored = StoredSession::from_credentials(&credentials);
            let written = write_atomic(&self.path, &stored).await;
            // Memory always holds the newest session, so a refreshed pair is
            // used for the rest of the process even if the disk write failed
            *state = Some(credentials);
            written?;
            debug!("stored credentials");
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = None;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), "removed credential file");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Io(format!("removing credential file: {e}"))),
            }
        })
    }
}

/// Write the session to a file atomically with 0600 permissions on unix.
async fn write_atomic(path: &Path, session: &StoredSession) -> Result<()> {
    let json = serde_json::to_string_pretty(session)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    if !dir.as_os_str().is_empty() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating credential directory: {e}")))?;
    }

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
