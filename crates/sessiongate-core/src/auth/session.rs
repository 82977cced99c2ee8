//! Durable storage for the session across process restarts.
//!
//! Only a subset of the session is durable: identity, access token and an
//! authenticated flag. The refresh token is kept out of the session file
//! entirely; `FileSessionStore` can optionally keep it in the OS keychain.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::credentials::RefreshTokenVault;
use super::state::{AccessToken, Identity, RefreshToken, SessionState};

/// Session file name in the session directory
const SESSION_FILE: &str = "session.json";

/// Current on-disk layout version.
pub const SESSION_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub version: u32,
    pub identity: Option<Identity>,
    #[serde(rename = "accessToken")]
    pub access_token: Option<AccessToken>,
    pub authenticated: bool,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
    /// Never written to the session file.
    #[serde(skip)]
    pub refresh_token: Option<RefreshToken>,
}

impl PersistedSession {
    /// Capture the durable fields of a session.
    pub fn from_state(state: &SessionState) -> Self {
        let access_token = state.access_token().cloned();
        Self {
            version: SESSION_FORMAT_VERSION,
            identity: state.identity().cloned(),
            authenticated: access_token.is_some(),
            access_token,
            saved_at: Utc::now(),
            refresh_token: state.refresh_token().cloned(),
        }
    }

    /// Whether this record can rehydrate an authenticated session.
    pub fn is_usable(&self) -> bool {
        self.authenticated && self.access_token.is_some() && self.identity.is_some()
    }
}

/// Where the session is kept between runs.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>>;

    fn save(&self, session: &PersistedSession) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

/// JSON file in the session directory, plus the keychain for the
/// refresh token when enabled.
pub struct FileSessionStore {
    dir: PathBuf,
    keychain: Option<Box<dyn RefreshTokenVault>>,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            keychain: None,
        }
    }

    /// Also persist the refresh token through the given keychain store.
    pub fn with_keychain(mut self, keychain: impl RefreshTokenVault + 'static) -> Self {
        self.keychain = Some(Box::new(keychain));
        self
    }

    pub fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn write_file(path: &Path, contents: &str) -> Result<()> {
        use std::io::Write as _;

        let mut options = std::fs::OpenOptions::new();
        options.truncate(true).write(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to open session file: {}", path.display()))?;
        file.write_all(contents.as_bytes())
            .context("Failed to write session file")?;
        file.flush()?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let mut session: PersistedSession =
            serde_json::from_str(&contents).context("Failed to parse session file")?;

        if session.version != SESSION_FORMAT_VERSION {
            warn!(
                version = session.version,
                expected = SESSION_FORMAT_VERSION,
                "Ignoring session file with unknown version"
            );
            return Ok(None);
        }

        if let Some(ref keychain) = self.keychain {
            // An unreachable keychain still leaves a usable session
            session.refresh_token = match keychain.get() {
                Ok(token) => token,
                Err(e) => {
                    warn!(error = %e, "Keychain unavailable, restoring without refresh token");
                    None
                }
            };
            debug!(
                has_refresh = session.refresh_token.is_some(),
                "Refresh token looked up in keychain"
            );
        }

        Ok(Some(session))
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let contents = serde_json::to_string_pretty(session)?;
        Self::write_file(&self.session_path(), &contents)?;

        if let Some(ref keychain) = self.keychain {
            match session.refresh_token {
                Some(ref token) => keychain.store(token)?,
                None => keychain.delete()?,
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(ref keychain) = self.keychain {
            keychain.delete()?;
        }
        Ok(())
    }
}

/// Process-local store. Used when persistence is disabled, and in tests.
#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that starts out holding `session`.
    pub fn with_session(session: PersistedSession) -> Self {
        Self {
            slot: Mutex::new(Some(session)),
        }
    }

    pub fn current(&self) -> Option<PersistedSession> {
        self.slot.lock().clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::state::SessionEvent;
    use anyhow::bail;
    use tempfile::tempdir;

    /// Vault backed by memory, optionally failing every lookup.
    #[derive(Default)]
    struct TestVault {
        token: Mutex<Option<RefreshToken>>,
        unavailable: bool,
    }

    impl RefreshTokenVault for std::sync::Arc<TestVault> {
        fn store(&self, token: &RefreshToken) -> Result<()> {
            *self.token.lock() = Some(token.clone());
            Ok(())
        }

        fn get(&self) -> Result<Option<RefreshToken>> {
            if self.unavailable {
                bail!("Platform secure storage failure: no secret service");
            }
            Ok(self.token.lock().clone())
        }

        fn delete(&self) -> Result<()> {
            *self.token.lock() = None;
            Ok(())
        }
    }

    fn authenticated_state() -> SessionState {
        let mut state = SessionState::new();
        state
            .transition(SessionEvent::LoginSucceeded {
                access: AccessToken::new("access-1"),
                refresh: Some(RefreshToken::new("refresh-1")),
                identity: Identity::new("7", "instructor", "Grace Hopper"),
            })
            .unwrap();
        state
    }

    #[test]
    fn test_from_state_captures_durable_fields() {
        let persisted = PersistedSession::from_state(&authenticated_state());
        assert_eq!(persisted.version, SESSION_FORMAT_VERSION);
        assert!(persisted.authenticated);
        assert!(persisted.is_usable());
        assert_eq!(persisted.access_token, Some(AccessToken::new("access-1")));
        assert_eq!(persisted.refresh_token, Some(RefreshToken::new("refresh-1")));
    }

    #[test]
    fn test_from_anonymous_state_is_not_usable() {
        let persisted = PersistedSession::from_state(&SessionState::new());
        assert!(!persisted.authenticated);
        assert!(!persisted.is_usable());
    }

    #[test]
    fn test_file_store_round_trip_preserves_persisted_fields() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested"));

        let mut original = PersistedSession::from_state(&authenticated_state());
        original.refresh_token = None;
        store.save(&original).unwrap();

        let loaded = store.load().unwrap().expect("session should load");
        assert_eq!(loaded, original);

        // Saving what was loaded changes nothing on the persisted fields
        store.save(&loaded).unwrap();
        assert_eq!(store.load().unwrap(), Some(original));
    }

    #[test]
    fn test_file_store_never_writes_refresh_token() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        store
            .save(&PersistedSession::from_state(&authenticated_state()))
            .unwrap();

        let raw = std::fs::read_to_string(store.session_path()).unwrap();
        assert!(!raw.contains("refresh-1"));
        assert!(raw.contains("\"authenticated\": true"));

        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.refresh_token.is_none());
    }

    #[test]
    fn test_file_store_missing_file_loads_none() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        assert!(store.load().unwrap().is_none());
        // Clearing nothing is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_file_store_clear_removes_file() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        store
            .save(&PersistedSession::from_state(&authenticated_state()))
            .unwrap();
        assert!(store.session_path().exists());

        store.clear().unwrap();
        assert!(!store.session_path().exists());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_ignores_unknown_version() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        let json = r#"{"version": 99, "identity": null, "accessToken": "a", "authenticated": true, "savedAt": "2026-01-01T00:00:00Z"}"#;
        std::fs::write(store.session_path(), json).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        std::fs::write(store.session_path(), "{not json").unwrap();
        assert!(store.load().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().to_path_buf());
        store
            .save(&PersistedSession::from_state(&authenticated_state()))
            .unwrap();
        let mode = std::fs::metadata(store.session_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_store_keeps_refresh_token() {
        let store = MemorySessionStore::new();
        assert!(store.load().unwrap().is_none());

        let persisted = PersistedSession::from_state(&authenticated_state());
        store.save(&persisted).unwrap();
        assert_eq!(
            store.current().and_then(|s| s.refresh_token),
            Some(RefreshToken::new("refresh-1"))
        );

        store.clear().unwrap();
        assert!(store.current().is_none());
    }

    #[test]
    fn test_keychain_holds_refresh_token() {
        let dir = tempdir().unwrap();
        let vault = std::sync::Arc::new(TestVault::default());
        let store = FileSessionStore::new(dir.path().to_path_buf()).with_keychain(vault.clone());

        store
            .save(&PersistedSession::from_state(&authenticated_state()))
            .unwrap();
        assert_eq!(*vault.token.lock(), Some(RefreshToken::new("refresh-1")));
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.refresh_token, Some(RefreshToken::new("refresh-1")));

        store.clear().unwrap();
        assert!(vault.token.lock().is_none());
    }

    #[test]
    fn test_unavailable_keychain_still_loads_session() {
        let dir = tempdir().unwrap();
        FileSessionStore::new(dir.path().to_path_buf())
            .save(&PersistedSession::from_state(&authenticated_state()))
            .unwrap();

        let vault = std::sync::Arc::new(TestVault {
            unavailable: true,
            ..TestVault::default()
        });
        let store = FileSessionStore::new(dir.path().to_path_buf()).with_keychain(vault);
        let loaded = store.load().unwrap().expect("session should load");
        assert!(loaded.is_usable());
        assert_eq!(loaded.access_token, Some(AccessToken::new("access-1")));
        assert!(loaded.refresh_token.is_none());
    }
}
