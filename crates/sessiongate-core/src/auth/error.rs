use thiserror::Error;

use super::state::Phase;
use crate::api::ApiError;

/// Rejected state machine transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{event} is not valid while the session is {phase}")]
    Invalid { event: &'static str, phase: Phase },

    #[error("Cannot start a refresh without a refresh token")]
    MissingRefreshToken,
}

/// Failure of a single credential refresh exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Refresh token expired")]
    Expired,

    #[error("Refresh token revoked")]
    Revoked,

    #[error("Network failure during refresh: {0}")]
    NetworkFailure(String),
}

impl RefreshError {
    /// Only network failures leave the session alive.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RefreshError::NetworkFailure(_))
    }
}

/// Errors that cross the request gateway boundary.
///
/// Non-401 responses are not errors here: they come back as an
/// `ApiResponse` untouched, and `ApiResponse::error_for_status` maps
/// them to an [`ApiError`] when the caller wants one.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not authenticated - please log in")]
    Unauthenticated,

    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Credential refresh failed, request can be retried: {0}")]
    RefreshTransientFailure(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl SessionError {
    /// True when issuing the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::RefreshTransientFailure(_))
    }

    /// True when the user has to log in before anything else works.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            SessionError::Unauthenticated | SessionError::SessionExpired
        )
    }
}
