//! Outstanding-work tracking for the dispatcher.
//!
//! Counts accepted messages that have not finished yet and lets any number
//! of tasks wait for that count to reach zero.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::Notify;

/// Counter of outstanding work with an async wait-for-zero.
///
/// Work is registered with [`Completion::add`] before it becomes visible to
/// other tasks and finished exactly once, usually through a
/// [`CompletionGuard`].
#[derive(Debug, Default)]
pub struct Completion {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl Completion {
    /// Creates a tracker with nothing outstanding.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `count` new units of outstanding work.
    pub fn add(&self, count: usize) {
        self.outstanding.fetch_add(count, Ordering::AcqRel);
    }

    /// Marks one unit of work as finished.
    pub fn complete_one(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "completed more work than was registered");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Returns the number of unfinished units.
    pub fn pending(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Waits until nothing is outstanding.
    ///
    /// Returns immediately if the count is already zero.
    pub async fn wait_idle(&self) {
        loop {
            // Registered before the check so a concurrent final
            // `complete_one` cannot slip between the load and the await.
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Returns a guard that completes one unit when dropped.
    pub fn guard(self: &Arc<Self>) -> CompletionGuard {
        CompletionGuard { completion: Arc::clone(self) }
    }
}

/// Finishes one unit of outstanding work on drop, on every exit path.
#[derive(Debug)]
pub struct CompletionGuard {
    completion: Arc<Completion>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.completion.complete_one();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_nothing_outstanding() {
        let completion = Completion::new();

        timeout(Duration::from_millis(100), completion.wait_idle())
            .await
            .expect("idle tracker should not block");
    }

    #[tokio::test]
    async fn wait_idle_blocks_until_all_work_completes() {
        let completion = Completion::new();
        completion.add(3);

        let waiter = tokio::spawn({
            let completion = completion.clone();
            async move { completion.wait_idle().await }
        });

        completion.complete_one();
        completion.complete_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter returned with work outstanding");

        completion.complete_one();
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish once idle")
            .expect("waiter task should not panic");
        assert_eq!(completion.pending(), 0);
    }

    #[tokio::test]
    async fn guard_completes_on_drop() {
        let completion = Completion::new();
        completion.add(1);

        let guard = completion.guard();
        assert_eq!(completion.pending(), 1);
        drop(guard);

        assert_eq!(completion.pending(), 0);
    }

    #[tokio::test]
    async fn guard_completes_when_task_panics() {
        let completion = Completion::new();
        completion.add(1);

        let guard = completion.guard();
        let result = tokio::spawn(async move {
            let _guard = guard;
            panic!("worker blew up");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(completion.pending(), 0);
    }

    #[tokio::test]
    async fn many_waiters_are_released_together() {
        let completion = Completion::new();
        completion.add(1);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let completion = completion.clone();
                tokio::spawn(async move { completion.wait_idle().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        completion.complete_one();

        for waiter in waiters {
            timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        }
    }
}
