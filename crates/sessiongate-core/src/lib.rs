//! sessiongate - the session layer in front of an API client.
//!
//! Every request goes through a [`RequestGateway`], which attaches the
//! current access token. When the API answers 401, the gateway asks the
//! [`RefreshCoordinator`] for a fresh token: one refresh runs no matter how
//! many requests failed at once, every caller gets the same outcome, and an
//! unrecoverable failure ends the session with a single logout notification.

pub mod api;
pub mod auth;
pub mod config;

pub use api::{ApiError, ApiRequest, ApiResponse, HttpTransport, RequestGateway, Transport};
pub use auth::{
    AccessToken, CredentialRefresher, FailedRequest, Identity, LogoutNotice, Phase,
    RefreshCoordinator, RefreshError, RefreshToken, SessionError, SessionObserver,
    SessionSnapshot,
};
pub use config::Config;
