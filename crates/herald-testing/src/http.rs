//! HTTP doubles: a scripted in-process client and a wiremock-backed sink.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use herald_core::{BoxError, HttpClient};
use reqwest::{header::CONTENT_TYPE, Method, Request, Response};
use wiremock::{
    matchers::{body_bytes, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Path every [`MessageSink`] accepts messages on.
pub const SINK_PATH: &str = "/messages";

/// A request as seen by [`MockHttpClient`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Full request URL.
    pub url: String,
    /// Request body.
    pub body: Bytes,
    /// Value of the content-type header, if any.
    pub content_type: Option<String>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Status(u16),
    Error(String),
}

/// HTTP client that answers every request with the same scripted outcome.
#[derive(Debug)]
pub struct MockHttpClient {
    outcome: Scripted,
    delay: Duration,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockHttpClient {
    /// Answers every request with an empty response of `status`.
    pub fn with_status(status: u16) -> Self {
        Self::scripted(Scripted::Status(status))
    }

    /// Fails every request with a client error carrying `message`.
    pub fn with_error(message: impl Into<String>) -> Self {
        Self::scripted(Scripted::Error(message.into()))
    }

    /// Waits `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn scripted(outcome: Scripted) -> Self {
        Self { outcome, delay: Duration::ZERO, requests: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: Request) -> Result<Response, BoxError> {
        let recorded = RecordedRequest {
            method: request.method().clone(),
            url: request.url().to_string(),
            body: request
                .body()
                .and_then(|body| body.as_bytes())
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
            content_type: request
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        };
        self.requests.lock().unwrap().push(recorded);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.outcome {
            Scripted::Status(status) => {
                let mut response = http::Response::new(Vec::<u8>::new());
                *response.status_mut() = http::StatusCode::from_u16(*status)?;
                Ok(Response::from(response))
            },
            Scripted::Error(message) => Err(BoxError::from(message.clone())),
        }
    }
}

/// Real HTTP endpoint collecting posted messages.
pub struct MessageSink {
    server: MockServer,
}

impl MessageSink {
    /// Starts a sink on a random local port with no responses mounted.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Returns the URL messages should be posted to.
    pub fn url(&self) -> String {
        format!("{}{SINK_PATH}", self.server.uri())
    }

    /// Answers every message with `status`.
    pub async fn respond_with_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(SINK_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answers every message with `status` after `delay`.
    pub async fn respond_with_delay(&self, status: u16, delay: Duration) {
        Mock::given(method("POST"))
            .and(path(SINK_PATH))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Answers messages whose body equals `body` with `status`, taking
    /// precedence over the catch-all responses above.
    pub async fn respond_to_body(&self, body: impl Into<Vec<u8>>, status: u16) {
        Mock::given(method("POST"))
            .and(path(SINK_PATH))
            .and(body_bytes(body.into()))
            .respond_with(ResponseTemplate::new(status))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Returns the bodies of every request received so far.
    pub async fn received_bodies(&self) -> Vec<Bytes> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| Bytes::from(request.body))
            .collect()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let received = self.received_bodies().await.len();
        assert_eq!(received, expected, "expected {expected} requests, received {received}");
    }
}
