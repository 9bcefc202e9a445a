//! Herald message dispatcher.
//!
//! Reads newline-delimited messages from stdin and posts each one to the
//! configured destination with bounded concurrency. Failed deliveries are
//! logged; Ctrl+C or SIGTERM stops reading and shuts the dispatcher down.

use std::sync::Arc;

use anyhow::{Context, Result};
use herald_core::{LoggingErrorHandler, Message};
use herald_delivery::{Dispatcher, HttpPostWorker};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let config = Config::load()?;
    info!(
        destination = %config.destination,
        concurrency = config.concurrency,
        batch_size = config.batch_size,
        timeout_ms = config.timeout_ms,
        "configuration loaded"
    );

    let worker = HttpPostWorker::with_reqwest(config.to_worker_config())
        .context("failed to create HTTP worker")?;
    let dispatcher = Dispatcher::new(worker, config.to_dispatcher_config())
        .context("failed to create dispatcher")?;

    let cancel = CancellationToken::new();
    dispatcher
        .run(cancel.clone(), Some(Arc::new(LoggingErrorHandler)))
        .context("failed to start dispatcher")?;

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            info!("shutdown signal received, no longer reading input");
        },
        pumped = pump_stdin(&dispatcher, config.batch_size) => {
            let submitted = pumped?;
            info!(submitted, "input exhausted, waiting for deliveries");
            dispatcher.sync().await;
        },
    }

    dispatcher.shutdown().await.context("dispatcher did not shut down cleanly")?;

    let stats = dispatcher.stats();
    info!(
        accepted = stats.accepted,
        delivered = stats.delivered,
        failed = stats.failed,
        abandoned = stats.abandoned,
        "herald finished"
    );
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,herald=debug"))
        .context("invalid RUST_LOG environment variable")?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Sends stdin lines in batches of `batch_size`, returning how many were
/// submitted.
///
/// Waits for the dispatcher to catch up whenever more than a few batches are
/// outstanding so memory stays bounded on large inputs.
async fn pump_stdin(dispatcher: &Dispatcher, batch_size: usize) -> Result<usize> {
    let high_water = batch_size.saturating_mul(dispatcher.config().concurrency).max(batch_size);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch = Vec::with_capacity(batch_size);
    let mut submitted = 0;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.is_empty() {
            continue;
        }
        batch.push(Message::from(line));

        if batch.len() >= batch_size {
            submitted += submit(dispatcher, &mut batch)?;
            if dispatcher.outstanding() > high_water {
                dispatcher.sync().await;
            }
        }
    }
    submitted += submit(dispatcher, &mut batch)?;

    Ok(submitted)
}

fn submit(dispatcher: &Dispatcher, batch: &mut Vec<Message>) -> Result<usize> {
    let count = batch.len();
    if let Err(e) = dispatcher.send(batch) {
        warn!(error = %e, batch_size = count, "batch rejected");
        return Err(e).context("dispatcher stopped accepting messages");
    }
    batch.clear();
    Ok(count)
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C signal");
        },
        () = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
