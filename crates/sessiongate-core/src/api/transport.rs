//! Dispatch of a single request over the wire.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use tracing::debug;

use super::request::{ApiRequest, ApiResponse};
use super::ApiError;
use crate::auth::AccessToken;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Sends one request with the given credential and reports the response
/// whatever its status. Never retries.
pub trait Transport: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        request: &'a ApiRequest,
        credential: Option<&'a AccessToken>,
    ) -> BoxFuture<'a, Result<ApiResponse, ApiError>>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ApiError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Share an existing client's connection pool.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn send(
        &self,
        request: &ApiRequest,
        credential: Option<&AccessToken>,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url())
            .headers(request.headers().clone());
        if let Some(token) = credential {
            builder = builder.bearer_auth(token.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        debug!(
            method = %request.method(),
            url = request.url(),
            status = status.as_u16(),
            authenticated = credential.is_some(),
            "Request dispatched"
        );

        Ok(ApiResponse::new(status, headers, body))
    }
}

impl Transport for HttpTransport {
    fn dispatch<'a>(
        &'a self,
        request: &'a ApiRequest,
        credential: Option<&'a AccessToken>,
    ) -> BoxFuture<'a, Result<ApiResponse, ApiError>> {
        Box::pin(self.send(request, credential))
    }
}
