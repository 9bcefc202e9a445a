//! Domain models shared by the dispatcher and its workers.

use std::fmt;

use bytes::Bytes;

use crate::error::{ErrorKind, HeraldError};

/// Opaque payload submitted for delivery.
///
/// Messages are immutable once created and compare by content. Cloning is
/// cheap because the payload is reference counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Message {
    content: Bytes,
}

impl Message {
    /// Creates a message from any byte payload.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self { content: content.into() }
    }

    /// Returns the payload bytes.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Returns the payload size in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Returns `true` for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Consumes the message, returning its payload.
    pub fn into_content(self) -> Bytes {
        self.content
    }
}

impl From<Bytes> for Message {
    fn from(content: Bytes) -> Self {
        Self { content }
    }
}

impl From<Vec<u8>> for Message {
    fn from(content: Vec<u8>) -> Self {
        Self::new(content)
    }
}

impl From<&'static str> for Message {
    fn from(content: &'static str) -> Self {
        Self::new(content)
    }
}

impl From<String> for Message {
    fn from(content: String) -> Self {
        Self::new(content)
    }
}

/// Failure record pairing a message with the reason its delivery failed.
///
/// Handed to the error handler exactly once per failed delivery, then
/// dropped. The failed message is included so handlers can resubmit it.
#[derive(Debug, Clone)]
pub struct DeliveryError {
    /// The message whose delivery failed.
    pub message: Message,
    /// Why it failed.
    pub cause: HeraldError,
}

impl DeliveryError {
    /// Pairs a message with its failure cause.
    pub fn new(message: Message, cause: HeraldError) -> Self {
        Self { message, cause }
    }

    /// Returns the category of the underlying cause.
    pub fn kind(&self) -> ErrorKind {
        self.cause.kind()
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cause.fmt(f)
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Run lifecycle of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Lifecycle {
    /// Created but `run` has not been called.
    NotRunning = 0,
    /// Accepting and dispatching messages.
    Running = 1,
    /// Cancelled; no longer accepting work, in-flight deliveries finishing.
    Draining = 2,
    /// Dispatch loop exited and all admitted deliveries completed.
    Stopped = 3,
}

impl Lifecycle {
    /// Decodes a lifecycle previously stored with `as u8`.
    ///
    /// Unknown values decode as `Stopped`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotRunning,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    /// Returns `true` if messages are currently admitted.
    pub fn is_accepting(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "not_running"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_compare_by_content() {
        assert_eq!(Message::from("payload"), Message::new(b"payload".to_vec()));
        assert_ne!(Message::from("a"), Message::from("b"));
    }

    #[test]
    fn message_exposes_payload() {
        let message = Message::from("hello");
        assert_eq!(message.content().as_ref(), b"hello");
        assert_eq!(message.len(), 5);
        assert!(!message.is_empty());
        assert!(Message::default().is_empty());
    }

    #[test]
    fn delivery_error_displays_cause() {
        let error = DeliveryError::new(Message::from("m"), HeraldError::failed("boom"));
        assert_eq!(error.to_string(), "boom");
        assert_eq!(error.kind(), ErrorKind::Worker);
        assert_eq!(error.message, Message::from("m"));
    }

    #[test]
    fn lifecycle_round_trips_through_u8() {
        for state in
            [Lifecycle::NotRunning, Lifecycle::Running, Lifecycle::Draining, Lifecycle::Stopped]
        {
            assert_eq!(Lifecycle::from_u8(state as u8), state);
        }
        assert_eq!(Lifecycle::from_u8(42), Lifecycle::Stopped);
        assert!(Lifecycle::Running.is_accepting());
        assert!(!Lifecycle::Draining.is_accepting());
    }
}
