//! Error types for message admission and delivery.
//!
//! Every failure the dispatcher or a worker can produce is a variant of
//! [`HeraldError`]. Callers branch on [`ErrorKind`] rather than inspecting
//! wrapped causes; underlying transport errors are carried as opaque shared
//! causes so the whole error stays cheap to clone.

use std::{fmt, sync::Arc, time::Duration};

use thiserror::Error;

use crate::models::Lifecycle;

/// Result type alias for herald operations.
pub type Result<T> = std::result::Result<T, HeraldError>;

/// Opaque, shareable underlying cause of a failure.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Boxed error as returned by pluggable collaborators such as HTTP clients.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while admitting or delivering messages.
#[derive(Debug, Clone, Error)]
pub enum HeraldError {
    /// Messages were submitted while the dispatcher was not accepting work.
    #[error("exchange not running (dispatcher is {state})")]
    NotRunning {
        /// Lifecycle state observed when the batch was rejected
        state: Lifecycle,
    },

    /// The dispatcher was asked to run a second time.
    #[error("dispatcher already started (dispatcher is {state})")]
    AlreadyStarted {
        /// Lifecycle state observed when `run` was called
        state: Lifecycle,
    },

    /// An accepted message was dropped by shutdown before it was dispatched.
    #[error("dispatcher shut down before the message was dispatched")]
    Abandoned,

    /// The delivery request could not be built.
    #[error("unable to create request: {message}")]
    RequestConstruction {
        /// Description of what was malformed
        message: String,
    },

    /// The transport failed before a response was received.
    #[error("unable to do request: {source}")]
    Transport {
        /// Underlying client or timeout error
        #[source]
        source: Cause,
    },

    /// The destination answered with a non-success status code.
    #[error("invalid response status code: {status_code}")]
    BadStatus {
        /// HTTP status code (>= 300)
        status_code: u16,
    },

    /// The attempt was cancelled through its cancellation token.
    #[error("delivery cancelled")]
    Cancelled,

    /// A worker reported a failure of its own.
    #[error("{message}")]
    Failed {
        /// Failure description supplied by the worker
        message: String,
    },

    /// Invalid construction-time configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Graceful shutdown did not drain outstanding work in time.
    #[error("shutdown did not complete within {timeout:?}")]
    ShutdownTimeout {
        /// The deadline that was exceeded
        timeout: Duration,
    },
}

impl HeraldError {
    /// Creates an admission error for the given lifecycle state.
    pub fn not_running(state: Lifecycle) -> Self {
        Self::NotRunning { state }
    }

    /// Creates a request construction error.
    pub fn request_construction(message: impl Into<String>) -> Self {
        Self::RequestConstruction { message: message.into() }
    }

    /// Wraps a transport-level error.
    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport { source: Arc::new(source) }
    }

    /// Wraps an already boxed transport-level error.
    pub fn transport_boxed(source: BoxError) -> Self {
        Self::Transport { source: Arc::from(source) }
    }

    /// Creates a bad status error.
    pub fn bad_status(status_code: u16) -> Self {
        Self::BadStatus { status_code }
    }

    /// Creates a worker failure from a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from(self)
    }

    /// Returns the HTTP status code for bad status errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::BadStatus { status_code } => Some(*status_code),
            _ => None,
        }
    }
}

/// Category of a [`HeraldError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Work was not accepted by the dispatcher.
    Admission,
    /// A request could not be constructed.
    RequestConstruction,
    /// Network or client failure, including timeouts.
    Transport,
    /// Non-success response status.
    BadStatus,
    /// Cancellation through the attempt's token.
    Cancelled,
    /// Failure reported by a custom worker.
    Worker,
    /// Invalid configuration.
    Configuration,
    /// Shutdown problems.
    Shutdown,
}

impl From<&HeraldError> for ErrorKind {
    fn from(error: &HeraldError) -> Self {
        match error {
            HeraldError::NotRunning { .. }
            | HeraldError::AlreadyStarted { .. }
            | HeraldError::Abandoned => Self::Admission,
            HeraldError::RequestConstruction { .. } => Self::RequestConstruction,
            HeraldError::Transport { .. } => Self::Transport,
            HeraldError::BadStatus { .. } => Self::BadStatus,
            HeraldError::Cancelled => Self::Cancelled,
            HeraldError::Failed { .. } => Self::Worker,
            HeraldError::Configuration { .. } => Self::Configuration,
            HeraldError::ShutdownTimeout { .. } => Self::Shutdown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admission => write!(f, "admission"),
            Self::RequestConstruction => write!(f, "request_construction"),
            Self::Transport => write!(f, "transport"),
            Self::BadStatus => write!(f, "bad_status"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Worker => write!(f, "worker"),
            Self::Configuration => write!(f, "configuration"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}
