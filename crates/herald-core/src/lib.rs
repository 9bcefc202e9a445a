//! Core types for the herald message dispatcher.
//!
//! Defines the message model, the [`Worker`] and [`ErrorHandler`]
//! capabilities, the [`HttpClient`] seam used by HTTP workers, and the
//! [`HeraldError`] taxonomy shared by every other crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod models;
pub mod worker;

pub use client::HttpClient;
pub use error::{BoxError, Cause, ErrorKind, HeraldError, Result};
pub use models::{DeliveryError, Lifecycle, Message};
pub use worker::{ErrorHandler, LoggingErrorHandler, NoOpErrorHandler, Worker};
