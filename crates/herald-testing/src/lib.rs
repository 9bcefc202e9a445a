//! Test doubles for exercising the dispatcher deterministically.
//!
//! Provides a scripted [`MockWorker`] that records calls and the highest
//! number of concurrent deliveries it observed, a scripted
//! [`MockHttpClient`] for the HTTP worker, a wiremock-backed [`MessageSink`]
//! for end-to-end tests and a [`RecordingErrorHandler`].

#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::{future::Future, time::Duration};

pub mod handler;
pub mod http;
pub mod worker;

pub use handler::RecordingErrorHandler;
pub use http::{MessageSink, MockHttpClient, RecordedRequest};
pub use worker::MockWorker;

/// Polls `condition` every few milliseconds until it holds.
///
/// # Panics
///
/// Panics with `what` if the condition does not hold within `timeout`.
pub async fn wait_until<F>(timeout: Duration, what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let polled = tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "timed out after {timeout:?} waiting for {what}");
}

/// Runs `future` and panics if it does not finish within `timeout`.
pub async fn within<F: Future>(timeout: Duration, what: &str, future: F) -> F::Output {
    match tokio::time::timeout(timeout, future).await {
        Ok(output) => output,
        Err(_) => panic!("timed out after {timeout:?} waiting for {what}"),
    }
}
