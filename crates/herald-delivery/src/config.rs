//! Configuration for the dispatcher and the HTTP POST worker.

use std::time::Duration;

use herald_core::{HeraldError, Result};

/// Configuration for a [`crate::Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum number of deliveries executing at once. Also the exchange
    /// buffer capacity.
    pub concurrency: usize,

    /// Deadline used by [`crate::Dispatcher::shutdown`].
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::DEFAULT_CONCURRENCY,
            shutdown_timeout: Duration::from_secs(crate::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
        }
    }
}

impl DispatcherConfig {
    /// Creates a configuration with the given concurrency and default timeouts.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency, ..Default::default() }
    }

    /// Checks that the configuration can drive a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::Configuration` for a zero concurrency.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(HeraldError::configuration("concurrency must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for an [`crate::http::HttpPostWorker`].
#[derive(Debug, Clone)]
pub struct HttpWorkerConfig {
    /// URL every message is posted to.
    pub destination: String,
    /// Upper bound for a single delivery attempt.
    pub timeout: Duration,
    /// User agent sent with each request.
    pub user_agent: String,
}

impl Default for HttpWorkerConfig {
    fn default() -> Self {
        Self {
            destination: "http://127.0.0.1:8080/messages".to_string(),
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: format!("herald/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpWorkerConfig {
    /// Creates a configuration for `destination` with the given timeout.
    pub fn new(destination: impl Into<String>, timeout: Duration) -> Self {
        Self { destination: destination.into(), timeout, ..Default::default() }
    }

    /// Checks the parts of the configuration that are not validated per request.
    ///
    /// The destination itself is parsed on every attempt and reported as a
    /// request construction failure.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::Configuration` for a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(HeraldError::configuration("timeout must be greater than zero"));
        }
        Ok(())
    }
}
