//! Bounded-concurrency message delivery.
//!
//! This crate implements the [`Dispatcher`], which accepts batches of
//! messages, queues them in a bounded exchange and hands each one to a
//! [`herald_core::Worker`] while never running more than `concurrency`
//! deliveries at once. It also provides [`http::HttpPostWorker`], a worker
//! that POSTs each message to a fixed destination.
//!
//! # Architecture
//!
//! ```text
//! ┌────────┐ send  ┌──────────┐ recv ┌───────────────┐ permit ┌───────────────┐
//! │ Caller │──────▶│ Exchange │─────▶│ Dispatch loop │───────▶│ Delivery task │
//! └────────┘       └──────────┘      └───────────────┘        └───────────────┘
//!     │                                                              │
//!     │ sync                                            Worker::deliver
//!     ▼                                                              ▼
//! ┌────────────┐ ◀──────────── complete_one ───────────── ┌──────────────┐
//! │ Completion │                                           │ ErrorHandler │
//! └────────────┘                                           └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use herald_core::{LoggingErrorHandler, Message};
//! use herald_delivery::{http::HttpPostWorker, Dispatcher, DispatcherConfig, HttpWorkerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> herald_core::Result<()> {
//! let worker = HttpPostWorker::with_reqwest(HttpWorkerConfig::new(
//!     "https://example.com/ingest",
//!     Duration::from_secs(5),
//! ))?;
//! let dispatcher = Dispatcher::new(worker, DispatcherConfig::with_concurrency(8))?;
//!
//! dispatcher.run(CancellationToken::new(), Some(Arc::new(LoggingErrorHandler)))?;
//! dispatcher.send(&[Message::from("hello"), Message::from("world")])?;
//! dispatcher.sync().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod completion;
pub mod config;
pub mod dispatcher;
pub mod http;

pub use completion::{Completion, CompletionGuard};
pub use config::{DispatcherConfig, HttpWorkerConfig};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use http::HttpPostWorker;

/// Default number of concurrent deliveries.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default per-attempt HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Default graceful shutdown deadline in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 30;
