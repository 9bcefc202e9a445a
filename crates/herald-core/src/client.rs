//! HTTP client capability used by HTTP-based workers.
//!
//! Abstracted behind a trait so tests can substitute scripted fakes for the
//! production `reqwest::Client`.

use reqwest::{Request, Response};

use crate::error::BoxError;

/// Executes fully built HTTP requests.
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Sends `request` and returns the response, whatever its status.
    async fn execute(&self, request: Request) -> Result<Response, BoxError>;
}

#[async_trait::async_trait]
impl HttpClient for reqwest::Client {
    async fn execute(&self, request: Request) -> Result<Response, BoxError> {
        reqwest::Client::execute(self, request).await.map_err(BoxError::from)
    }
}

#[async_trait::async_trait]
impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    async fn execute(&self, request: Request) -> Result<Response, BoxError> {
        (**self).execute(request).await
    }
}
