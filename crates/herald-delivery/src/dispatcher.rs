//! Dispatcher with bounded exchange, concurrency limiter and completion
//! tracking.
//!
//! A [`Dispatcher`] owns one run: [`Dispatcher::run`] starts the dispatch
//! loop, [`Dispatcher::send`] admits batches, [`Dispatcher::sync`] waits for
//! everything admitted so far to be attempted. Cancelling the token passed to
//! `run` (or calling [`Dispatcher::shutdown`]) stops admission, reports
//! messages that never reached a worker as abandoned and lets deliveries that
//! already started finish on their own timeout.
//!
//! # Lifecycle
//!
//! ```text
//! NotRunning ──run──▶ Running ──cancel──▶ Draining ──in-flight done──▶ Stopped
//! ```

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
    time::Duration,
};

use herald_core::{DeliveryError, ErrorHandler, HeraldError, Lifecycle, Message, Result, Worker};
use tokio::{
    runtime::Handle,
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{completion::Completion, config::DispatcherConfig};

/// Point-in-time counters for a dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Messages accepted by `send`.
    pub accepted: u64,
    /// Deliveries the worker reported as successful.
    pub delivered: u64,
    /// Deliveries the worker reported as failed.
    pub failed: u64,
    /// Accepted messages dropped by shutdown before reaching a worker.
    pub abandoned: u64,
    /// Deliveries currently holding a limiter permit.
    pub in_flight: usize,
    /// Accepted messages not yet completed.
    pub outstanding: usize,
}

/// Bounded-concurrency message dispatcher.
///
/// Cloning yields another handle to the same dispatcher, so `send` and
/// `sync` can be called from any task. Dropping the last handle does not
/// stop the run: messages already accepted are still delivered, after which
/// the dispatch loop exits on its own.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    worker: Arc<dyn Worker>,
    config: DispatcherConfig,
    shared: Arc<Shared>,
    run_state: OnceLock<RunState>,
    dispatch_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Everything `run` allocates. Set exactly once; its presence means the
/// dispatcher has been started.
struct RunState {
    exchange: mpsc::Sender<Message>,
    runtime: Handle,
    run_token: CancellationToken,
}

/// State touched by the dispatcher handle, the loop and delivery tasks.
struct Shared {
    lifecycle: AtomicU8,
    completion: Arc<Completion>,
    limiter: Arc<Semaphore>,
    concurrency: usize,
    handler: OnceLock<Arc<dyn ErrorHandler>>,
    accepted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl Dispatcher {
    /// Creates a dispatcher that hands messages to `worker`.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::Configuration` if the configuration is invalid.
    pub fn new<W: Worker>(worker: W, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            lifecycle: AtomicU8::new(Lifecycle::NotRunning as u8),
            completion: Completion::new(),
            limiter: Arc::new(Semaphore::new(config.concurrency)),
            concurrency: config.concurrency,
            handler: OnceLock::new(),
            accepted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                worker: Arc::new(worker),
                config,
                shared,
                run_state: OnceLock::new(),
                dispatch_loop: Mutex::new(None),
            }),
        })
    }

    /// Starts the dispatch loop in the background and returns immediately.
    ///
    /// The run stops when `cancel` is cancelled. `handler`, when present, is
    /// called once for every failed or abandoned message, from the task that
    /// observed the failure.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::AlreadyStarted` if the dispatcher was run before
    /// and `HeraldError::Configuration` when called outside a tokio runtime.
    pub fn run(
        &self,
        cancel: CancellationToken,
        handler: Option<Arc<dyn ErrorHandler>>,
    ) -> Result<()> {
        let runtime = Handle::try_current().map_err(|e| {
            HeraldError::configuration(format!("dispatcher must run inside a tokio runtime: {e}"))
        })?;

        let (exchange, receiver) = mpsc::channel(self.inner.config.concurrency);
        let run_token = cancel.child_token();
        let run_state =
            RunState { exchange, runtime: runtime.clone(), run_token: run_token.clone() };
        if self.inner.run_state.set(run_state).is_err() {
            return Err(HeraldError::AlreadyStarted { state: self.lifecycle() });
        }

        // Only the call that won `run_state` gets here, so the handler slot
        // is still empty and this set cannot fail.
        if let Some(handler) = handler {
            let _ = self.inner.shared.handler.set(handler);
        }
        self.inner.shared.set_lifecycle(Lifecycle::Running);

        let dispatch_loop = DispatchLoop {
            worker: Arc::clone(&self.inner.worker),
            shared: Arc::clone(&self.inner.shared),
            receiver,
            run_token,
            delivery_token: CancellationToken::new(),
        };
        let handle = runtime.spawn(dispatch_loop.run());
        *self.inner.dispatch_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        info!(concurrency = self.inner.config.concurrency, "dispatcher running");
        Ok(())
    }

    /// Admits a batch of messages for delivery.
    ///
    /// The whole batch is counted as outstanding before any of it is queued,
    /// then a background task feeds it into the exchange in order. Returns
    /// as soon as the batch is accepted, not when it is delivered. Messages
    /// are cloned, so a rejected batch can be resubmitted as is.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::NotRunning` without admitting anything if the
    /// dispatcher has not been started or has begun shutting down.
    pub fn send(&self, messages: &[Message]) -> Result<()> {
        let state = self.lifecycle();
        let Some(RunState { exchange, runtime, run_token }) = self.inner.run_state.get() else {
            return Err(HeraldError::not_running(state));
        };
        if !state.is_accepting() || run_token.is_cancelled() || exchange.is_closed() {
            return Err(HeraldError::not_running(state));
        }
        if messages.is_empty() {
            return Ok(());
        }

        let batch = messages.to_vec();
        self.inner.shared.completion.add(batch.len());
        self.inner.shared.accepted.fetch_add(batch.len() as u64, Ordering::Relaxed);
        debug!(batch_size = batch.len(), "batch accepted");

        let sender = exchange.clone();
        let shared = Arc::clone(&self.inner.shared);
        runtime.spawn(async move {
            for message in batch {
                if let Err(mpsc::error::SendError(message)) = sender.send(message).await {
                    shared.abandon(message);
                }
            }
        });

        Ok(())
    }

    /// Waits until every message accepted so far has been attempted.
    ///
    /// Returns immediately when nothing is outstanding. May be called any
    /// number of times, from any task.
    pub async fn sync(&self) {
        self.inner.shared.completion.wait_idle().await;
    }

    /// Stops the run and waits for outstanding work using the configured
    /// shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::ShutdownTimeout` if work is still outstanding
    /// when the timeout expires.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_graceful(self.inner.config.shutdown_timeout).await
    }

    /// Stops admitting messages and waits up to `timeout` for the dispatch
    /// loop to exit and in-flight deliveries to finish.
    ///
    /// # Errors
    ///
    /// Returns `HeraldError::ShutdownTimeout` if the deadline passes first.
    /// Deliveries keep running in the background in that case.
    pub async fn shutdown_graceful(&self, timeout: Duration) -> Result<()> {
        let Some(RunState { run_token, .. }) = self.inner.run_state.get() else {
            info!("dispatcher was not started, shutdown completed immediately");
            return Ok(());
        };

        info!(
            outstanding = self.outstanding(),
            timeout_ms = timeout.as_millis(),
            "initiating graceful dispatcher shutdown"
        );
        run_token.cancel();

        let handle =
            self.inner.dispatch_loop.lock().unwrap_or_else(PoisonError::into_inner).take();
        let drained = async {
            if let Some(handle) = handle {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "dispatch loop panicked during shutdown");
                }
            }
            self.inner.shared.completion.wait_idle().await;
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => {
                info!("dispatcher shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    outstanding = self.outstanding(),
                    timeout_ms = timeout.as_millis(),
                    "dispatcher shutdown timed out, deliveries still running"
                );
                Err(HeraldError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Returns the current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.shared.lifecycle()
    }

    /// Returns the number of accepted messages not yet completed.
    pub fn outstanding(&self) -> usize {
        self.inner.shared.completion.pending()
    }

    /// Returns the dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Returns current counters.
    pub fn stats(&self) -> DispatcherStats {
        let shared = &self.inner.shared;
        DispatcherStats {
            accepted: shared.accepted.load(Ordering::Relaxed),
            delivered: shared.delivered.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            abandoned: shared.abandoned.load(Ordering::Relaxed),
            in_flight: shared.concurrency.saturating_sub(shared.limiter.available_permits()),
            outstanding: shared.completion.pending(),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("concurrency", &self.inner.config.concurrency)
            .field("lifecycle", &self.lifecycle())
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(run_state) = self.run_state.get() {
            if !run_state.run_token.is_cancelled() {
                debug!(
                    outstanding = self.shared.completion.pending(),
                    "last dispatcher handle dropped, finishing accepted messages"
                );
            }
        }
    }
}

impl Shared {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        self.lifecycle.store(state as u8, Ordering::Release);
    }

    fn report(&self, error: DeliveryError) {
        if let Some(handler) = self.handler.get() {
            handler.handle_error(error);
        }
    }

    /// Completes an accepted message that will never reach the worker.
    fn abandon(&self, message: Message) {
        let _completion = self.completion.guard();
        self.abandoned.fetch_add(1, Ordering::Relaxed);
        warn!(payload_bytes = message.len(), "message abandoned by shutdown before dispatch");
        self.report(DeliveryError::new(message, HeraldError::Abandoned));
    }
}

/// The single task that moves messages from the exchange onto delivery tasks.
struct DispatchLoop {
    worker: Arc<dyn Worker>,
    shared: Arc<Shared>,
    receiver: mpsc::Receiver<Message>,
    run_token: CancellationToken,
    /// Handed to every delivery and never cancelled: attempts end on the
    /// worker's own timeout, not on shutdown.
    delivery_token: CancellationToken,
}

impl DispatchLoop {
    async fn run(mut self) {
        let mut sequence: u64 = 0;

        loop {
            let message = tokio::select! {
                biased;
                () = self.run_token.cancelled() => break,
                received = self.receiver.recv() => match received {
                    Some(message) => message,
                    None => break,
                },
            };

            // Waiting here is what bounds concurrency: nothing more is pulled
            // off the exchange until a delivery releases its permit.
            let permit = tokio::select! {
                biased;
                () = self.run_token.cancelled() => {
                    self.shared.abandon(message);
                    break;
                },
                permit = Arc::clone(&self.shared.limiter).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_closed) => {
                        self.shared.abandon(message);
                        break;
                    },
                },
            };

            sequence += 1;
            self.spawn_delivery(sequence, message, permit);
        }

        self.drain().await;
    }

    fn spawn_delivery(&self, sequence: u64, message: Message, permit: OwnedSemaphorePermit) {
        let worker = Arc::clone(&self.worker);
        let shared = Arc::clone(&self.shared);
        let cancel = self.delivery_token.clone();
        let span = info_span!("delivery", sequence, payload_bytes = message.len());

        tokio::spawn(
            async move {
                // Dropped in reverse order: the permit is released before the
                // message counts as complete.
                let _completion = shared.completion.guard();
                let _permit = permit;

                debug!("delivery started");
                match worker.deliver(&cancel, &message).await {
                    Ok(()) => {
                        shared.delivered.fetch_add(1, Ordering::Relaxed);
                        debug!("message delivered");
                    },
                    Err(cause) => {
                        shared.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(kind = %cause.kind(), error = %cause, "delivery failed");
                        shared.report(DeliveryError::new(message, cause));
                    },
                }
            }
            .instrument(span),
        );
    }

    async fn drain(mut self) {
        self.shared.set_lifecycle(Lifecycle::Draining);
        self.run_token.cancel();

        // Closing fails every pending and future enqueue; whatever is already
        // buffered is handed back here.
        self.receiver.close();
        while let Some(message) = self.receiver.recv().await {
            self.shared.abandon(message);
        }

        info!(outstanding = self.shared.completion.pending(), "dispatcher draining");
        self.shared.completion.wait_idle().await;

        self.shared.set_lifecycle(Lifecycle::Stopped);
        info!("dispatcher stopped");
    }
}
