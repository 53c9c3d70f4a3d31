//! Cancellable fixed-interval task driving the sensor poll loop.

use log::{debug, warn};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Handle to a running poll loop.
///
/// Each tick receives the loop's token so it can re-check cancellation at
/// the point where it publishes. Dropping the handle cancels the loop.
pub(crate) struct PollTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl PollTask {
    /// Spawn a loop running `tick` every `period`, starting immediately.
    ///
    /// `period` must be non-zero. Slow ticks delay the schedule instead of
    /// producing a burst of catch-up ticks.
    pub(crate) fn spawn<F, Fut>(period: Duration, token: CancellationToken, mut tick: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tick(loop_token.clone()).await;
            }
            debug!("[Poll] Loop stopped");
        });

        Self {
            token,
            handle: Some(handle),
            period,
        }
    }

    pub(crate) fn period(&self) -> Duration {
        self.period
    }

    pub(crate) fn is_active(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop scheduling further ticks. A tick already running finishes, but
    /// sees the cancellation before it publishes.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel and wait for the loop to exit.
    pub(crate) async fn join(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
            && !e.is_cancelled()
        {
            warn!("[Poll] Loop terminated abnormally: {}", e);
        }
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_task(period: Duration) -> (PollTask, Arc<AtomicU32>) {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let task = PollTask::spawn(period, CancellationToken::new(), move |_token| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_fixed_interval() {
        let (task, ticks) = counting_task(Duration::from_millis(1000));

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        assert!(task.is_active());
        assert_eq!(task.period(), Duration::from_millis(1000));
        task.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_join() {
        let (task, ticks) = counting_task(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        task.join().await;

        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_loop() {
        let (task, ticks) = counting_task(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(task);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_parent_stops_child_loop() {
        let parent = CancellationToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let task = PollTask::spawn(Duration::from_millis(100), parent.child_token(), move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        parent.cancel();
        assert!(!task.is_active());
        task.join().await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
