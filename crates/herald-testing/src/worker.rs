//! Scripted worker that records what the dispatcher hands it.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_core::{HeraldError, Message, Result, Worker};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Worker with per-message scripted outcomes.
///
/// Succeeds unless a failure was scripted for the message content. Every
/// call is recorded, and the worker tracks how many deliveries were inside
/// `deliver` at the same time.
///
/// ```
/// use herald_core::HeraldError;
/// use herald_testing::MockWorker;
///
/// let worker = MockWorker::new().fail_on("2", HeraldError::failed("message 2 failed"));
/// assert_eq!(worker.call_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockWorker {
    failures: HashMap<Message, HeraldError>,
    delay: Duration,
    gate: Option<Semaphore>,
    calls: Mutex<Vec<Message>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockWorker {
    /// Creates a worker that succeeds for every message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails deliveries of messages with this content with `error`.
    pub fn fail_on(mut self, content: impl Into<Message>, error: HeraldError) -> Self {
        self.failures.insert(content.into(), error);
        self
    }

    /// Holds each delivery for `delay`, returning early with
    /// `HeraldError::Cancelled` if the token fires first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Holds each delivery until [`MockWorker::release`] lets it through.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Lets `count` held deliveries proceed.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    /// Returns every message delivered so far, in call order.
    pub fn calls(&self) -> Vec<Message> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the number of calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Returns how many times `content` was delivered.
    pub fn calls_for(&self, content: impl Into<Message>) -> usize {
        let message = content.into();
        self.calls.lock().unwrap().iter().filter(|call| **call == message).count()
    }

    /// Returns the number of deliveries currently inside `deliver`.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the highest number of simultaneous deliveries observed.
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    async fn hold(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(gate) = &self.gate {
            tokio::select! {
                () = cancel.cancelled() => return Err(HeraldError::Cancelled),
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                },
            }
        }
        if !self.delay.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => return Err(HeraldError::Cancelled),
                () = tokio::time::sleep(self.delay) => {},
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for MockWorker {
    async fn deliver(&self, cancel: &CancellationToken, message: &Message) -> Result<()> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        self.calls.lock().unwrap().push(message.clone());

        let outcome = match self.hold(cancel).await {
            Ok(()) => self.failures.get(message).cloned().map_or(Ok(()), Err),
            Err(cancelled) => Err(cancelled),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
