//! Configuration management.
//!
//! Configuration is stored at `~/.config/sessiongate/config.json`; a missing
//! file means defaults. A few values can be overridden from the environment.
//! The session file lives under the cache directory
//! (`~/.cache/sessiongate/session.json` on Linux).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "sessiongate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment override for `auth_base_url`
pub const ENV_AUTH_URL: &str = "SESSIONGATE_AUTH_URL";

/// Environment override for `refresh_timeout_secs`
pub const ENV_REFRESH_TIMEOUT: &str = "SESSIONGATE_REFRESH_TIMEOUT_SECS";

const DEFAULT_AUTH_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_REFRESH_PATH: &str = "/auth/token/refresh";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth_base_url: String,
    pub refresh_path: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    /// Keep the session on disk between runs.
    pub persist_session: bool,
    /// Keep the refresh token in the OS keychain between runs.
    pub persist_refresh_credential: bool,
    /// Directory for log files; logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_base_url: DEFAULT_AUTH_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            persist_session: true,
            persist_refresh_credential: false,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path).context("Failed to read config file")?;
            Ok(serde_json::from_str(&contents).context("Failed to parse config file")?)
        } else {
            Ok(Self::default())
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Whether a refresh token outlives the process.
    pub fn keeps_refresh_credential(&self) -> bool {
        self.persist_session && self.persist_refresh_credential
    }

    /// Directory holding the persisted session.
    pub fn session_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_AUTH_URL) {
            self.auth_base_url = url;
        }
        if let Some(raw) = lookup(ENV_REFRESH_TIMEOUT) {
            match raw.parse() {
                Ok(secs) => self.refresh_timeout_secs = secs,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid refresh timeout override"),
            }
        }
        self
    }

    /// Full URL of the refresh endpoint.
    pub fn refresh_url(&self) -> String {
        format!(
            "{}/{}",
            self.auth_base_url.trim_end_matches('/'),
            self.refresh_path.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.persist_session);
        assert!(!config.persist_refresh_credential);
        assert_eq!(config.refresh_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_refresh_credential_needs_both_flags() {
        assert!(!Config::default().keeps_refresh_credential());

        let keychain_only = Config {
            persist_session: false,
            persist_refresh_credential: true,
            ..Config::default()
        };
        assert!(!keychain_only.keeps_refresh_credential());

        let both = Config {
            persist_refresh_credential: true,
            ..Config::default()
        };
        assert!(both.keeps_refresh_credential());
    }

    #[test]
    fn test_refresh_url_joins_cleanly() {
        let config = Config {
            auth_base_url: "https://auth.example.com/api/".to_string(),
            refresh_path: "/token/refresh".to_string(),
            ..Config::default()
        };
        assert_eq!(config.refresh_url(), "https://auth.example.com/api/token/refresh");
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"auth_base_url": "https://a.example", "persist_session": false}"#)
                .unwrap();
        assert_eq!(config.auth_base_url, "https://a.example");
        assert!(!config.persist_session);
        assert_eq!(config.refresh_path, DEFAULT_REFRESH_PATH);
        assert_eq!(config.refresh_timeout_secs, DEFAULT_REFRESH_TIMEOUT_SECS);
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(|key| match key {
            ENV_AUTH_URL => Some("https://override.example".to_string()),
            ENV_REFRESH_TIMEOUT => Some("3".to_string()),
            _ => None,
        });
        assert_eq!(config.auth_base_url, "https://override.example");
        assert_eq!(config.refresh_timeout_secs, 3);
    }

    #[test]
    fn test_invalid_timeout_override_is_ignored() {
        let config = Config::default().with_overrides(|key| match key {
            ENV_REFRESH_TIMEOUT => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.refresh_timeout_secs, DEFAULT_REFRESH_TIMEOUT_SECS);
    }
}
