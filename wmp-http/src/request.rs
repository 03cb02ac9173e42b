//! Overridable HTTP request capability.
//!
//! Negotiation sends its requests through an [`HttpRequester`]. The client
//! uses its own [`reqwest::Client`] by default; callers can pass another
//! requester per call, typically a [`reqwest_middleware::ClientWithMiddleware`]
//! that injects authentication headers.

use reqwest::{Request, Response};

/// Executes a prepared HTTP request.
#[async_trait::async_trait]
pub trait HttpRequester: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent or no response was
    /// received.
    async fn execute(&self, request: Request) -> Result<Response, reqwest_middleware::Error>;
}

#[async_trait::async_trait]
impl HttpRequester for reqwest::Client {
    async fn execute(&self, request: Request) -> Result<Response, reqwest_middleware::Error> {
        Self::execute(self, request)
            .await
            .map_err(reqwest_middleware::Error::from)
    }
}

#[async_trait::async_trait]
impl HttpRequester for reqwest_middleware::ClientWithMiddleware {
    async fn execute(&self, request: Request) -> Result<Response, reqwest_middleware::Error> {
        Self::execute(self, request).await
    }
}
