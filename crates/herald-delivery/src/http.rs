//! Worker that delivers each message as the body of an HTTP POST.
//!
//! One request per message, no retries. Any response with a status below 300
//! counts as delivered; the response body is never read.

use std::time::Instant;

use async_trait::async_trait;
use herald_core::{HeraldError, HttpClient, Message, Result, Worker};
use reqwest::{header, Body, Method, Request, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HttpWorkerConfig;

/// Posts every message to a fixed destination.
#[derive(Debug, Clone)]
pub struct HttpPostWorker<C = reqwest::Client> {
    client: C,
    config: HttpWorkerConfig,
}

impl HttpPostWorker<reqwest::Client> {
    /// Creates a worker backed by a pooled `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::Configuration` if the configuration is invalid
    /// or the HTTP client cannot be built.
    pub fn with_reqwest(config: HttpWorkerConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| HeraldError::configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }
}

impl<C: HttpClient> HttpPostWorker<C> {
    /// Creates a worker that sends requests through `client`.
    pub fn new(client: C, config: HttpWorkerConfig) -> Self {
        Self { client, config }
    }

    /// Returns the configured destination URL.
    pub fn destination(&self) -> &str {
        &self.config.destination
    }

    fn build_request(&self, message: &Message) -> Result<Request> {
        let url = Url::parse(&self.config.destination).map_err(|e| {
            HeraldError::request_construction(format!(
                "invalid destination {:?}: {e}",
                self.config.destination
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(HeraldError::request_construction(format!(
                "unsupported scheme {:?} in destination",
                url.scheme()
            )));
        }

        let mut request = Request::new(Method::POST, url);
        *request.body_mut() = Some(Body::from(message.content().clone()));
        *request.timeout_mut() = Some(self.config.timeout);
        request.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/octet-stream"),
        );

        Ok(request)
    }
}

#[async_trait]
impl<C: HttpClient> Worker for HttpPostWorker<C> {
    async fn deliver(&self, cancel: &CancellationToken, message: &Message) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(HeraldError::Cancelled);
        }

        let request = self.build_request(message)?;
        let start_time = Instant::now();

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HeraldError::Cancelled),
            outcome = tokio::time::timeout(self.config.timeout, self.client.execute(request)) => {
                match outcome {
                    Ok(Ok(response)) => response,
                    Ok(Err(e)) => {
                        warn!(
                            duration_ms = start_time.elapsed().as_millis(),
                            error = %e,
                            "request failed"
                        );
                        return Err(HeraldError::transport_boxed(e));
                    },
                    Err(elapsed) => {
                        warn!(timeout_ms = self.config.timeout.as_millis(), "request timed out");
                        return Err(HeraldError::transport(elapsed));
                    },
                }
            },
        };

        let status_code = response.status().as_u16();
        drop(response);

        debug!(
            status = status_code,
            duration_ms = start_time.elapsed().as_millis(),
            "received response"
        );

        if status_code >= 300 {
            return Err(HeraldError::bad_status(status_code));
        }
        Ok(())
    }
}
