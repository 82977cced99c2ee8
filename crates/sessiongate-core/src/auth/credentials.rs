use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

use super::state::RefreshToken;

/// Default keychain service name.
pub const SERVICE_NAME: &str = "sessiongate";

/// Keychain account the refresh token is stored under.
const REFRESH_ACCOUNT: &str = "refresh-token";

/// Somewhere outside the session file to keep the refresh token.
pub trait RefreshTokenVault: Send + Sync {
    fn store(&self, token: &RefreshToken) -> Result<()>;

    /// `None` if nothing is stored.
    fn get(&self) -> Result<Option<RefreshToken>>;

    /// Deleting a missing entry succeeds.
    fn delete(&self) -> Result<()>;
}

/// OS keychain storage for the refresh token.
///
/// The session file never contains the refresh token; when durable refresh
/// is enabled it lives here instead.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl CredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, REFRESH_ACCOUNT).context("Failed to create keyring entry")
    }
}

impl RefreshTokenVault for CredentialStore {
    /// Store the refresh token in the OS keychain
    fn store(&self, token: &RefreshToken) -> Result<()> {
        self.entry()?
            .set_password(token.as_str())
            .context("Failed to store refresh token in keychain")
    }

    fn get(&self) -> Result<Option<RefreshToken>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(RefreshToken::new(token))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve refresh token from keychain"),
        }
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "No refresh token in keychain to delete");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to delete refresh token from keychain"),
        }
    }
}
