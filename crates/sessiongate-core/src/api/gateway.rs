//! The request gateway every outbound call goes through.
//!
//! It attaches the current access token, and when a response comes back
//! 401 it asks the `RefreshCoordinator` for a valid credential and
//! dispatches the request exactly once more. Every other status, 403 and
//! 5xx included, is handed back to the caller untouched.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::request::{ApiRequest, ApiResponse};
use super::transport::{HttpTransport, Transport};
use crate::auth::{
    AccessToken, CredentialStore, FailedRequest, FileSessionStore, HttpRefresher, MemorySessionStore,
    RefreshCoordinator, SessionError, SessionStore,
};
use crate::config::Config;

/// Which dispatch of a request this is. A request is retried at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Initial,
    AfterRefresh,
}

pub struct RequestGateway<T: Transport = HttpTransport> {
    transport: T,
    coordinator: RefreshCoordinator,
}

impl<T: Transport> RequestGateway<T> {
    pub fn new(transport: T, coordinator: RefreshCoordinator) -> Self {
        Self {
            transport,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request`, refreshing the credential and retrying once on 401.
    ///
    /// Any non-401 response is returned as-is; use
    /// [`ApiResponse::error_for_status`] to turn it into an error.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        let credential = self.coordinator.current_credential();
        let response = self.dispatch(request, credential.clone(), Attempt::Initial).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        debug!(url = request.url(), "Request unauthorized, checking credential");
        let fresh = self
            .coordinator
            .ensure_valid_credential(&FailedRequest::new(credential))
            .await?;

        self.dispatch(request, Some(fresh), Attempt::AfterRefresh).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<AccessToken>,
        attempt: Attempt,
    ) -> Result<ApiResponse, SessionError> {
        let response = self
            .transport
            .dispatch(request, credential.as_ref())
            .await?;
        if attempt == Attempt::AfterRefresh && response.is_unauthorized() {
            info!(url = request.url(), "Request still unauthorized after refresh");
        }
        Ok(response)
    }
}

impl RequestGateway<HttpTransport> {
    /// Build a gateway backed by HTTP from configuration, restoring any
    /// persisted session.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::with_timeout(config.request_timeout())
            .context("Failed to build HTTP client")?;
        let refresher = HttpRefresher::with_client(transport.client().clone(), config.refresh_url());

        let store: Arc<dyn SessionStore> = if config.persist_session {
            let mut store = FileSessionStore::new(config.session_dir()?);
            if config.persist_refresh_credential {
                store = store.with_keychain(CredentialStore::default());
            }
            Arc::new(store)
        } else {
            Arc::new(MemorySessionStore::new())
        };

        let coordinator = RefreshCoordinator::new(Arc::new(refresher), store)
            .refresh_timeout(config.refresh_timeout());
        if let Err(e) = coordinator.restore() {
            warn!(error = %e, "Failed to restore session, starting anonymous");
        }

        Ok(Self::new(transport, coordinator))
    }
}
