//! Integration tests for dispatch, error reporting and shutdown.
//!
//! Every scenario drives a real dispatcher on the tokio runtime with a
//! scripted worker, then checks which messages reached the worker and which
//! were reported to the error handler.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use herald_core::{
    DeliveryError, ErrorHandler, ErrorKind, HeraldError, Lifecycle, Message, Worker,
};
use herald_delivery::{Dispatcher, DispatcherConfig};
use herald_testing::{wait_until, within, MockWorker, RecordingErrorHandler};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn batch(contents: &[&'static str]) -> Vec<Message> {
    contents.iter().map(|content| Message::from(*content)).collect()
}

fn contents(messages: &[Message]) -> HashSet<Vec<u8>> {
    messages.iter().map(|message| message.content().to_vec()).collect()
}

async fn run_scenario(
    concurrency: usize,
    worker: Arc<MockWorker>,
    messages: &[Message],
) -> Result<(Dispatcher, Arc<RecordingErrorHandler>)> {
    let handler = Arc::new(RecordingErrorHandler::new());
    let dispatcher = Dispatcher::new(worker, DispatcherConfig::with_concurrency(concurrency))?;
    dispatcher.run(CancellationToken::new(), Some(handler.clone()))?;

    dispatcher.send(messages)?;
    within(WAIT, "sync", dispatcher.sync()).await;

    Ok((dispatcher, handler))
}

#[tokio::test]
async fn one_message_delivered_without_errors() -> Result<()> {
    let worker = Arc::new(MockWorker::new());

    let (dispatcher, handler) = run_scenario(1, worker.clone(), &batch(&["1"])).await?;

    assert_eq!(worker.calls(), batch(&["1"]));
    assert_eq!(handler.count(), 0);
    assert_eq!(dispatcher.stats().delivered, 1);
    assert_eq!(dispatcher.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn one_failing_message_reported_once() -> Result<()> {
    let worker = Arc::new(MockWorker::new().fail_on("1", HeraldError::failed("boom")));

    let (dispatcher, handler) = run_scenario(1, worker.clone(), &batch(&["1"])).await?;

    let errors = handler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, Message::from("1"));
    assert!(matches!(&errors[0].cause, HeraldError::Failed { message } if message == "boom"));
    assert_eq!(errors[0].to_string(), "boom");
    assert_eq!(errors[0].kind(), ErrorKind::Worker);
    assert_eq!(dispatcher.stats().failed, 1);
    Ok(())
}

#[tokio::test]
async fn three_messages_delivered_concurrently_without_errors() -> Result<()> {
    let worker = Arc::new(MockWorker::new());
    let messages = batch(&["1", "2", "3"]);

    let (dispatcher, handler) = run_scenario(3, worker.clone(), &messages).await?;

    assert_eq!(worker.call_count(), 3);
    assert_eq!(contents(&worker.calls()), contents(&messages));
    assert_eq!(handler.count(), 0);
    assert_eq!(dispatcher.stats().delivered, 3);
    Ok(())
}

#[tokio::test]
async fn only_the_failing_middle_message_reported() -> Result<()> {
    let worker = Arc::new(MockWorker::new().fail_on("2", HeraldError::failed("message 2 failed")));

    let (dispatcher, handler) = run_scenario(3, worker.clone(), &batch(&["1", "2", "3"])).await?;

    let errors = handler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, Message::from("2"));
    assert!(matches!(
        &errors[0].cause,
        HeraldError::Failed { message } if message == "message 2 failed"
    ));
    assert_eq!(worker.call_count(), 3);
    let stats = dispatcher.stats();
    assert_eq!((stats.delivered, stats.failed), (2, 1));
    Ok(())
}

#[tokio::test]
async fn multiple_messages_delivered_without_errors() -> Result<()> {
    let worker = Arc::new(MockWorker::new());
    let messages = batch(&["1", "2", "3", "4", "5"]);

    let (dispatcher, handler) = run_scenario(2, worker.clone(), &messages).await?;

    assert_eq!(contents(&worker.calls()), contents(&messages));
    assert_eq!(worker.call_count(), 5);
    assert_eq!(handler.count(), 0);
    assert_eq!(dispatcher.stats().delivered, 5);
    Ok(())
}

#[tokio::test]
async fn only_failing_messages_reported() -> Result<()> {
    let worker = Arc::new(
        MockWorker::new()
            .fail_on("2", HeraldError::failed("message 2 failed"))
            .fail_on("4", HeraldError::failed("message 4 failed")),
    );

    let (dispatcher, handler) =
        run_scenario(2, worker.clone(), &batch(&["1", "2", "3", "4", "5"])).await?;

    assert_eq!(contents(&handler.messages()), contents(&batch(&["2", "4"])));
    assert_eq!(handler.count(), 2);
    for error in handler.errors() {
        let content = String::from_utf8_lossy(error.message.content()).into_owned();
        assert_eq!(error.to_string(), format!("message {content} failed"));
    }
    let stats = dispatcher.stats();
    assert_eq!((stats.delivered, stats.failed), (3, 2));
    Ok(())
}

#[tokio::test]
async fn every_failing_message_reported() -> Result<()> {
    let messages = batch(&["1", "2", "3", "4", "5"]);
    let worker = messages.iter().fold(MockWorker::new(), |worker, message| {
        worker.fail_on(message.clone(), HeraldError::bad_status(500))
    });
    let worker = Arc::new(worker);

    let (dispatcher, handler) = run_scenario(2, worker.clone(), &messages).await?;

    assert_eq!(contents(&handler.messages()), contents(&messages));
    assert_eq!(handler.count_of(ErrorKind::BadStatus), 5);
    assert_eq!(dispatcher.stats().failed, 5);
    Ok(())
}

#[tokio::test]
async fn failures_without_handler_are_dropped() -> Result<()> {
    let worker = Arc::new(MockWorker::new().fail_on("1", HeraldError::failed("nobody listens")));
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::default())?;
    dispatcher.run(CancellationToken::new(), None)?;

    dispatcher.send(&batch(&["1", "2"]))?;
    within(WAIT, "sync", dispatcher.sync()).await;

    assert_eq!(worker.call_count(), 2);
    assert_eq!(dispatcher.stats().failed, 1);
    Ok(())
}

#[tokio::test]
async fn concurrency_never_exceeds_limit() -> Result<()> {
    let worker = Arc::new(MockWorker::new().gated());
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::with_concurrency(3))?;
    dispatcher.run(CancellationToken::new(), None)?;

    dispatcher.send(&batch(&["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"]))?;
    wait_until(WAIT, "three deliveries in flight", || worker.running() == 3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(worker.call_count(), 3, "a fourth delivery started before a permit was free");
    assert_eq!(dispatcher.stats().in_flight, 3);
    assert_eq!(dispatcher.outstanding(), 10);

    worker.release(10);
    within(WAIT, "sync", dispatcher.sync()).await;

    assert_eq!(worker.max_concurrency(), 3);
    assert_eq!(dispatcher.stats().delivered, 10);
    assert_eq!(dispatcher.stats().in_flight, 0);
    Ok(())
}

#[tokio::test]
async fn single_worker_dispatches_in_submission_order() -> Result<()> {
    let worker = Arc::new(MockWorker::new());
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::with_concurrency(1))?;
    dispatcher.run(CancellationToken::new(), None)?;
    let messages = batch(&["first", "second", "third", "fourth"]);

    dispatcher.send(&messages)?;
    within(WAIT, "sync", dispatcher.sync()).await;

    assert_eq!(worker.calls(), messages);
    Ok(())
}

#[tokio::test]
async fn sync_returns_immediately_when_idle() -> Result<()> {
    let dispatcher = Dispatcher::new(MockWorker::new(), DispatcherConfig::default())?;

    within(Duration::from_millis(100), "sync before run", dispatcher.sync()).await;

    dispatcher.run(CancellationToken::new(), None)?;
    within(Duration::from_millis(100), "sync after run", dispatcher.sync()).await;
    Ok(())
}

#[tokio::test]
async fn sync_is_repeatable_and_concurrent() -> Result<()> {
    let worker = Arc::new(MockWorker::new().with_delay(Duration::from_millis(20)));
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::with_concurrency(2))?;
    dispatcher.run(CancellationToken::new(), None)?;

    dispatcher.send(&batch(&["1", "2", "3"]))?;
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.sync().await })
        })
        .collect();
    for waiter in waiters {
        within(WAIT, "concurrent sync", waiter).await?;
    }
    assert_eq!(worker.call_count(), 3);

    within(WAIT, "second sync", dispatcher.sync()).await;

    dispatcher.send(&batch(&["4"]))?;
    within(WAIT, "sync after more work", dispatcher.sync()).await;
    assert_eq!(worker.call_count(), 4);
    Ok(())
}

#[tokio::test]
async fn batches_from_many_tasks_all_delivered() -> Result<()> {
    let worker = Arc::new(MockWorker::new());
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::with_concurrency(4))?;
    dispatcher.run(CancellationToken::new(), None)?;

    let senders: Vec<_> = (0..8)
        .map(|task| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let messages: Vec<Message> =
                    (0..25).map(|n| Message::from(format!("{task}-{n}"))).collect();
                dispatcher.send(&messages)
            })
        })
        .collect();
    for sender in senders {
        sender.await??;
    }
    within(WAIT, "sync", dispatcher.sync()).await;

    assert_eq!(worker.call_count(), 200);
    assert_eq!(contents(&worker.calls()).len(), 200);
    assert_eq!(dispatcher.stats().accepted, 200);
    Ok(())
}

/// Fails the first attempt for every message and succeeds afterwards.
#[derive(Default)]
struct FlakyWorker {
    failed_once: Mutex<HashSet<Message>>,
    delivered: Mutex<Vec<Message>>,
}

#[async_trait]
impl Worker for FlakyWorker {
    async fn deliver(
        &self,
        _cancel: &CancellationToken,
        message: &Message,
    ) -> herald_core::Result<()> {
        if self.failed_once.lock().unwrap().insert(message.clone()) {
            return Err(HeraldError::failed("first attempt always fails"));
        }
        self.delivered.lock().unwrap().push(message.clone());
        Ok(())
    }
}

#[tokio::test]
async fn handler_can_resubmit_failed_messages() -> Result<()> {
    let worker = Arc::new(FlakyWorker::default());
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::with_concurrency(2))?;

    let resubmitter = dispatcher.clone();
    let handler = move |error: DeliveryError| {
        resubmitter.send(&[error.message]).expect("dispatcher still running");
    };
    dispatcher.run(CancellationToken::new(), Some(Arc::new(handler)))?;

    dispatcher.send(&batch(&["x", "y"]))?;
    within(WAIT, "sync", dispatcher.sync()).await;

    // The retry is admitted before the failed attempt completes, so sync
    // only returns once the retries are done too.
    let delivered = worker.delivered.lock().unwrap().clone();
    assert_eq!(contents(&delivered), contents(&batch(&["x", "y"])));
    let stats = dispatcher.stats();
    assert_eq!((stats.accepted, stats.failed, stats.delivered), (4, 2, 2));

    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn send_after_shutdown_rejected() -> Result<()> {
    let worker = Arc::new(MockWorker::new());
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::default())?;
    dispatcher.run(CancellationToken::new(), None)?;
    dispatcher.send(&batch(&["before"]))?;
    within(WAIT, "sync", dispatcher.sync()).await;

    dispatcher.shutdown().await?;
    let error = dispatcher.send(&batch(&["after"])).unwrap_err();

    assert!(matches!(error, HeraldError::NotRunning { state: Lifecycle::Stopped }));
    assert_eq!(worker.calls(), batch(&["before"]));
    assert_eq!(dispatcher.stats().accepted, 1);
    Ok(())
}

#[tokio::test]
async fn parent_token_cancellation_stops_dispatcher() -> Result<()> {
    let dispatcher = Dispatcher::new(MockWorker::new(), DispatcherConfig::default())?;
    let cancel = CancellationToken::new();
    dispatcher.run(cancel.child_token(), None)?;

    cancel.cancel();
    wait_until(WAIT, "dispatcher stopped", || dispatcher.lifecycle() == Lifecycle::Stopped).await;

    assert_eq!(dispatcher.send(&batch(&["late"])).unwrap_err().kind(), ErrorKind::Admission);
    dispatcher.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_abandons_undispatched_messages_exactly_once() -> Result<()> {
    let worker = Arc::new(MockWorker::new().gated());
    let handler = Arc::new(RecordingErrorHandler::new());
    let dispatcher = Dispatcher::new(worker.clone(), DispatcherConfig::with_concurrency(1))?;
    dispatcher.run(CancellationToken::new(), Some(handler.clone()))?;

    dispatcher.send(&batch(&["1", "2", "3", "4", "5"]))?;
    wait_until(WAIT, "first delivery started", || worker.call_count() == 1).await;

    let shutdown = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.shutdown_graceful(WAIT).await }
    });
    wait_until(WAIT, "undispatched messages abandoned", || handler.count() == 4).await;
    assert_eq!(dispatcher.lifecycle(), Lifecycle::Draining);
    assert!(!shutdown.is_finished(), "shutdown returned while a delivery was in flight");

    worker.release(1);
    shutdown.await??;

    assert_eq!(worker.calls(), batch(&["1"]));
    assert_eq!(contents(&handler.messages()), contents(&batch(&["2", "3", "4", "5"])));
    assert_eq!(handler.count_of(ErrorKind::Admission), 4);
    assert!(handler.errors().iter().all(|error| matches!(error.cause, HeraldError::Abandoned)));

    let stats = dispatcher.stats();
    assert_eq!(
        (stats.accepted, stats.delivered, stats.failed, stats.abandoned),
        (5, 1, 0, 4)
    );
    assert_eq!(dispatcher.outstanding(), 0);
    assert_eq!(dispatcher.lifecycle(), Lifecycle::Stopped);
    Ok(())
}

#[tokio::test]
async fn shutdown_twice_is_harmless() -> Result<()> {
    let dispatcher = Dispatcher::new(MockWorker::new(), DispatcherConfig::default())?;
    dispatcher.run(CancellationToken::new(), None)?;

    dispatcher.shutdown().await?;
    dispatcher.shutdown().await?;

    assert_eq!(dispatcher.lifecycle(), Lifecycle::Stopped);
    Ok(())
}

#[tokio::test]
async fn logging_handler_accepts_failures() -> Result<()> {
    let worker = Arc::new(MockWorker::new().fail_on("x", HeraldError::Cancelled));
    let dispatcher = Dispatcher::new(worker, DispatcherConfig::default())?;
    let handler: Arc<dyn ErrorHandler> = Arc::new(herald_core::LoggingErrorHandler);
    dispatcher.run(CancellationToken::new(), Some(handler))?;

    dispatcher.send(&batch(&["x"]))?;
    within(WAIT, "sync", dispatcher.sync()).await;

    assert_eq!(dispatcher.stats().failed, 1);
    Ok(())
}
