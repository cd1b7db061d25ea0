//! Encrypted, single-file persistence for the authenticated session.
//!
//! The whole state is one Fernet token on disk. Writers are serialized by a
//! mutex and replace the file through a rename, so a concurrent reader sees
//! either the previous blob or the new one. Anything that cannot be read back
//! (missing file, wrong key, corrupt bytes) loads as the empty state.

use chrono::{DateTime, Utc};
use fernet::Fernet;
use outreach_core::{AppConfig, ConfigError, CoreError, SessionError, SessionHealth, SessionState};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct SessionStore {
    path: PathBuf,
    fernet: Fernet,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Open a store at `path`. Without a key a fresh one is generated, which
    /// lives only as long as this process: sessions written with it cannot be
    /// read after a restart.
    pub fn open(path: impl Into<PathBuf>, key: Option<&str>) -> Result<Self, ConfigError> {
        let path = path.into();
        let fernet = match key {
            Some(key) => Fernet::new(key.trim()).ok_or(ConfigError::InvalidEncryptionKey)?,
            None => {
                warn!(
                    "No encryption key configured; generated a process-local key for {}",
                    path.display()
                );
                Fernet::new(&Fernet::generate_key()).ok_or(ConfigError::InvalidEncryptionKey)?
            }
        };

        Ok(Self {
            path,
            fernet,
            write_lock: Mutex::new(()),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Self::open(config.state_file.clone(), config.encryption_key.as_deref())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: absent or undecryptable state is the empty state.
    pub async fn load(&self) -> SessionState {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No session file at {}", self.path.display());
                return SessionState::default();
            }
            Err(e) => {
                warn!("Could not read session file {}: {}", self.path.display(), e);
                return SessionState::default();
            }
        };

        let token = match std::str::from_utf8(&bytes) {
            Ok(token) => token.trim(),
            Err(_) => {
                warn!("Session file {} is not a valid token", self.path.display());
                return SessionState::default();
            }
        };

        let plaintext = match self.fernet.decrypt(token) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                warn!(
                    "Session file {} could not be decrypted; treating as empty",
                    self.path.display()
                );
                return SessionState::default();
            }
        };

        match serde_json::from_slice(&plaintext) {
            Ok(state) => state,
            Err(e) => {
                warn!("Session payload is malformed: {}", e);
                SessionState::default()
            }
        }
    }

    /// Replace the whole file with `state`.
    pub async fn save(&self, state: &SessionState) -> Result<(), CoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_unlocked(state).await
    }

    /// Record `cookies` as the current session and stamp the login time.
    pub async fn set_cookies(
        &self,
        cookies: HashMap<String, String>,
    ) -> Result<SessionState, CoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = self.load().await;
        state.cookies = cookies;
        state.last_login_at = Some(now_epoch_seconds());
        self.write_unlocked(&state).await?;
        info!(
            "Stored session with {} cookies at {}",
            state.cookies.len(),
            self.path.display()
        );
        Ok(state)
    }

    pub async fn cookies(&self) -> HashMap<String, String> {
        self.load().await.cookies
    }

    pub async fn last_login_at(&self) -> Option<f64> {
        self.load().await.last_login_at
    }

    pub async fn health(&self) -> SessionHealth {
        let state = self.load().await;
        let mut cookie_names: Vec<String> = state.cookies.keys().cloned().collect();
        cookie_names.sort();

        SessionHealth {
            logged_in: !state.cookies.is_empty(),
            last_login_at: state.last_login_at.and_then(epoch_to_datetime),
            cookie_names,
        }
    }

    async fn write_unlocked(&self, state: &SessionState) -> Result<(), CoreError> {
        let plaintext = serde_json::to_vec(state).map_err(SessionError::Encode)?;
        let token = self.fernet.encrypt(&plaintext);

        let tmp_path = self.tmp_path();
        let write_failed = |source: std::io::Error| SessionError::WriteFailed {
            path: self.path.display().to_string(),
            source,
        };

        tokio::fs::write(&tmp_path, token.as_bytes())
            .await
            .map_err(write_failed)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(write_failed)?;

        debug!("Wrote session state to {}", self.path.display());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| ".state.enc".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn now_epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
