use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;

/// Schedules delayed tasks.
///
/// Everything the node schedules for later goes through this trait so the
/// timing can be swapped out, e.g. for a manually driven implementation.
pub trait Timers: Send + Sync + 'static {
    /// Runs `task` once `delay` has elapsed unless the returned handle is
    /// cancelled first.
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle;
}

#[derive(Debug, Default, Clone, Copy)]
/// Timers backed by the tokio runtime.
pub struct TokioTimers;

impl Timers for TokioTimers {
    fn after(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        let handle = TimerHandle::default();
        let watcher = handle.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = watcher.cancelled() => return,
            }

            if !watcher.is_cancelled() {
                task.await;
            }
        });

        handle
    }
}

#[derive(Debug, Default)]
struct TimerState {
    cancelled: AtomicBool,
    notify: Notify,
}

#[derive(Debug, Clone, Default)]
/// A handle to a scheduled task.
pub struct TimerHandle {
    state: Arc<TimerState>,
}

impl TimerHandle {
    /// Cancels the task if it has not started yet.
    ///
    /// Cancelling is idempotent.
    pub fn cancel(&self) {
        if !self.state.cancelled.swap(true, Ordering::SeqCst) {
            self.state.notify.notify_one();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Waits until the handle is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.state.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures::FutureExt;

    use super::*;

    fn counting_task(counter: &Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let counter = Arc::new(AtomicUsize::new(0));
        let _handle = TokioTimers.after(Duration::from_secs(5), counting_task(&counter));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = TokioTimers.after(Duration::from_secs(5), counting_task(&counter));

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
