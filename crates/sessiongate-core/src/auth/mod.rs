//! Session management.
//!
//! This module provides:
//! - `SessionState`: credential pair, identity and lifecycle phase
//! - `RefreshCoordinator`: single-flight refresh and sole writer of the session
//! - `CredentialRefresher`: the refresh-token exchange (`HttpRefresher`)
//! - `SessionStore`: durable session storage (`FileSessionStore`, `MemorySessionStore`)
//! - `CredentialStore`: OS keychain storage for the refresh token
//! - `SessionObserver`: process-wide logout notification

pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod observer;
pub mod refresher;
pub mod session;
pub mod state;
mod writer;

pub use coordinator::{FailedRequest, RefreshCoordinator, DEFAULT_REFRESH_TIMEOUT};
pub use credentials::{CredentialStore, RefreshTokenVault};
pub use error::{RefreshError, SessionError, TransitionError};
pub use observer::{LogoutNotice, SessionObserver};
pub use refresher::{CredentialRefresher, HttpRefresher, RefreshedCredentials};
pub use session::{FileSessionStore, MemorySessionStore, PersistedSession, SessionStore};
pub use state::{
    AccessToken, FailureKind, Identity, Phase, RefreshToken, SessionEvent, SessionSnapshot,
    SessionState,
};
