//! Error handler that keeps every failure for later assertions.

use std::sync::Mutex;

use herald_core::{DeliveryError, ErrorHandler, ErrorKind, Message};

/// Records every [`DeliveryError`] it receives.
#[derive(Debug, Default)]
pub struct RecordingErrorHandler {
    errors: Mutex<Vec<DeliveryError>>,
}

impl RecordingErrorHandler {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded errors in arrival order.
    pub fn errors(&self) -> Vec<DeliveryError> {
        self.errors.lock().unwrap().clone()
    }

    /// Returns the number of recorded errors.
    pub fn count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    /// Returns the messages of all recorded errors.
    pub fn messages(&self) -> Vec<Message> {
        self.errors.lock().unwrap().iter().map(|error| error.message.clone()).collect()
    }

    /// Returns how many recorded errors have the given kind.
    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.errors.lock().unwrap().iter().filter(|error| error.kind() == kind).count()
    }
}

impl ErrorHandler for RecordingErrorHandler {
    fn handle_error(&self, error: DeliveryError) {
        self.errors.lock().unwrap().push(error);
    }
}
