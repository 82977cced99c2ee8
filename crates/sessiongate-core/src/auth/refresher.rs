//! The network exchange that trades a refresh token for a new access token.
//!
//! A refresher performs exactly one call per invocation: no retries and no
//! knowledge of who is waiting on the result. Timeouts are applied by the
//! caller (`RefreshCoordinator`), although `HttpRefresher` also sets one on
//! its HTTP client.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::RefreshError;
use super::state::{AccessToken, RefreshToken};
use crate::api::error::truncate_body;

/// Result of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedCredentials {
    pub access_token: AccessToken,
    /// Present when the auth server rotates refresh tokens.
    pub refresh_token: Option<RefreshToken>,
}

pub trait CredentialRefresher: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a RefreshToken,
    ) -> BoxFuture<'a, Result<RefreshedCredentials, RefreshError>>;
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken", alias = "token")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

/// Refresher backed by an HTTP auth endpoint.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpRefresher {
    client: Client,
    url: String,
}

impl HttpRefresher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, url))
    }

    /// Share an existing client's connection pool.
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Map a non-success status from the auth endpoint.
    ///
    /// 401 means the refresh token is no longer accepted; the body tells
    /// revocation apart from plain expiry. 400/403 are treated as a
    /// rejected (revoked) grant. Anything else is transient.
    fn classify_failure(status: StatusCode, body: &str) -> RefreshError {
        match status.as_u16() {
            401 if body.to_ascii_lowercase().contains("revoked") => RefreshError::Revoked,
            401 => RefreshError::Expired,
            400 | 403 => RefreshError::Revoked,
            _ => RefreshError::NetworkFailure(format!("Status {}: {}", status, truncate_body(body))),
        }
    }

    async fn exchange(&self, refresh_token: &RefreshToken) -> Result<RefreshedCredentials, RefreshError> {
        let response = self
            .client
            .post(&self.url)
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest {
                refresh_token: refresh_token.as_str(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = Self::classify_failure(status, &body);
            warn!(status = %status, error = %err, "Credential refresh rejected");
            return Err(err);
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::NetworkFailure(format!("Invalid refresh response: {}", e)))?;

        debug!(rotated = parsed.refresh_token.is_some(), "Credential refresh succeeded");

        Ok(RefreshedCredentials {
            access_token: AccessToken::new(parsed.access_token),
            refresh_token: parsed.refresh_token.map(RefreshToken::new),
        })
    }
}

impl CredentialRefresher for HttpRefresher {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a RefreshToken,
    ) -> BoxFuture<'a, Result<RefreshedCredentials, RefreshError>> {
        Box::pin(self.exchange(refresh_token))
    }
}
