//! Session state and its transition rules.
//!
//! `SessionState` is plain data: it holds no locks and performs no I/O.
//! The `RefreshCoordinator` owns the single instance and serializes every
//! call to [`SessionState::transition`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::TransitionError;

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Anonymous,
    Authenticated,
    Refreshing,
    /// Only exists inside a transition; always collapses to `Anonymous`.
    Invalid,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Anonymous => "anonymous",
            Phase::Authenticated => "authenticated",
            Phase::Refreshing => "refreshing",
            Phase::Invalid => "invalid",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Short-lived bearer token attached to individual requests.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens never show up in logs
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<{} bytes>)", self.0.len())
    }
}

/// Longer-lived token used only to obtain a new access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefreshToken(<{} bytes>)", self.0.len())
    }
}

/// Minimal snapshot of the signed-in user, for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub role: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl Identity {
    pub fn new(
        user_id: impl Into<String>,
        role: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
            display_name: display_name.into(),
        }
    }
}

/// How a refresh attempt failed, as far as the session is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network trouble; the session survives with its stale credential.
    Recoverable,
    /// The refresh token is expired or revoked; the session is over.
    Unrecoverable,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    LoginSucceeded {
        access: AccessToken,
        refresh: Option<RefreshToken>,
        identity: Identity,
    },
    RefreshStarted,
    RefreshSucceeded {
        access: AccessToken,
        /// Rotated refresh token, when the auth server issues one.
        refresh: Option<RefreshToken>,
    },
    RefreshFailed(FailureKind),
    LoggedOut,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::LoginSucceeded { .. } => "LoginSucceeded",
            SessionEvent::RefreshStarted => "RefreshStarted",
            SessionEvent::RefreshSucceeded { .. } => "RefreshSucceeded",
            SessionEvent::RefreshFailed(_) => "RefreshFailed",
            SessionEvent::LoggedOut => "LoggedOut",
        }
    }
}

/// Immutable view of the session handed to readers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub access_token: Option<AccessToken>,
    pub identity: Option<Identity>,
    /// Whether a refresh token is held. The token itself is not exposed.
    pub can_refresh: bool,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, Phase::Authenticated | Phase::Refreshing)
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    phase: Phase,
    access_token: Option<AccessToken>,
    refresh_token: Option<RefreshToken>,
    identity: Option<Identity>,
    authenticated_at: Option<DateTime<Utc>>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Anonymous,
            access_token: None,
            refresh_token: None,
            identity: None,
            authenticated_at: None,
            refreshed_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn access_token(&self) -> Option<&AccessToken> {
        self.access_token.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&RefreshToken> {
        self.refresh_token.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            access_token: self.access_token.clone(),
            identity: self.identity.clone(),
            can_refresh: self.refresh_token.is_some(),
            authenticated_at: self.authenticated_at,
            refreshed_at: self.refreshed_at,
        }
    }

    /// Apply an event. On error the state is left untouched.
    pub fn transition(&mut self, event: SessionEvent) -> Result<(), TransitionError> {
        let from = self.phase;
        match (from, event) {
            (
                Phase::Anonymous | Phase::Authenticated,
                SessionEvent::LoginSucceeded {
                    access,
                    refresh,
                    identity,
                },
            ) => {
                self.phase = Phase::Authenticated;
                self.access_token = Some(access);
                self.refresh_token = refresh;
                self.identity = Some(identity);
                self.authenticated_at = Some(Utc::now());
                self.refreshed_at = None;
            }
            (Phase::Authenticated, SessionEvent::RefreshStarted) => {
                if self.refresh_token.is_none() {
                    return Err(TransitionError::MissingRefreshToken);
                }
                self.phase = Phase::Refreshing;
            }
            (Phase::Refreshing, SessionEvent::RefreshSucceeded { access, refresh }) => {
                self.phase = Phase::Authenticated;
                self.access_token = Some(access);
                if let Some(refresh) = refresh {
                    self.refresh_token = Some(refresh);
                }
                self.refreshed_at = Some(Utc::now());
            }
            (Phase::Refreshing, SessionEvent::RefreshFailed(FailureKind::Recoverable)) => {
                self.phase = Phase::Authenticated;
            }
            (Phase::Refreshing, SessionEvent::RefreshFailed(FailureKind::Unrecoverable)) => {
                self.phase = Phase::Invalid;
                self.clear();
            }
            (_, SessionEvent::LoggedOut) => {
                self.clear();
            }
            (from, event) => {
                return Err(TransitionError::Invalid {
                    event: event.name(),
                    phase: from,
                });
            }
        }
        Ok(())
    }

    /// Atomic logout: every credential and the identity go together.
    fn clear(&mut self) {
        self.phase = Phase::Anonymous;
        self.access_token = None;
        self.refresh_token = None;
        self.identity = None;
        self.authenticated_at = None;
        self.refreshed_at = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
