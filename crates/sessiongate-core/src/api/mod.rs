//! Outbound request path.
//!
//! This module provides the `RequestGateway`, through which every call to
//! the REST API is made. The gateway attaches the bearer token, and turns a
//! 401 into a coordinated credential refresh followed by a single retry.
//!
//! Responses with any other status are returned unchanged; `ApiError`
//! classifies them when the caller asks for it.

pub mod error;
pub mod gateway;
pub mod request;
pub mod transport;

pub use error::ApiError;
pub use gateway::RequestGateway;
pub use request::{ApiRequest, ApiResponse};
pub use transport::{HttpTransport, Transport};
