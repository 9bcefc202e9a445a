//! Delivery and error-reporting capabilities.
//!
//! A [`Worker`] performs one delivery attempt for one message; any delivery
//! mechanism (HTTP, queue publish, file write) plugs into the dispatcher by
//! implementing it. An [`ErrorHandler`] receives every failed delivery.
//!
//! ```text
//!                 deliver(&token, &message)
//! ┌────────────┐ ─────────────────────────▶ ┌──────────────┐
//! │ Dispatcher │                            │ Worker impl  │
//! └────────────┘ ◀───────────────────────── └──────────────┘
//!       │            Ok(()) / HeraldError
//!       │ DeliveryError (failures only)
//!       ▼
//! ┌──────────────┐
//! │ ErrorHandler │
//! └──────────────┘
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{error::Result, models::DeliveryError, Message};

/// Performs a single delivery attempt for a single message.
///
/// Implementations must return promptly with [`crate::HeraldError::Cancelled`]
/// once `cancel` fires, must never mutate the message, and must surface every
/// failure as a returned error instead of panicking.
#[async_trait::async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Attempts to deliver `message`.
    async fn deliver(&self, cancel: &CancellationToken, message: &Message) -> Result<()>;
}

#[async_trait::async_trait]
impl<W: Worker + ?Sized> Worker for Arc<W> {
    async fn deliver(&self, cancel: &CancellationToken, message: &Message) -> Result<()> {
        (**self).deliver(cancel, message).await
    }
}

/// Receives delivery failures.
///
/// Called from whichever task executed the failed delivery, possibly from
/// many tasks at once. Implementations should return quickly; anything slow
/// belongs on a task of its own.
pub trait ErrorHandler: Send + Sync {
    /// Handles one failed delivery.
    fn handle_error(&self, error: DeliveryError);
}

impl<F> ErrorHandler for F
where
    F: Fn(DeliveryError) + Send + Sync,
{
    fn handle_error(&self, error: DeliveryError) {
        self(error);
    }
}

/// Error handler that discards all failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpErrorHandler;

impl ErrorHandler for NoOpErrorHandler {
    fn handle_error(&self, _error: DeliveryError) {}
}

/// Error handler that logs each failure at `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle_error(&self, error: DeliveryError) {
        warn!(
            kind = %error.kind(),
            payload_bytes = error.message.len(),
            error = %error.cause,
            "message delivery failed"
        );
    }
}
