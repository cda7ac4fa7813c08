use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ProxyError;
use crate::statistics::{ProxyStatistics, ProxyStatisticsInner};

/// Limits the work accepted by the proxy.
///
/// Ingress and egress requests share the same in-flight budget.
pub(crate) struct Backpressure {
    inflight: AtomicUsize,
    lag_micros: AtomicU64,
    max_inflight: usize,
    max_lag: Duration,
    statistics: ProxyStatistics,
    sampler_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl Backpressure {
    pub(crate) fn new(
        max_inflight: usize,
        max_lag: Duration,
        statistics: ProxyStatistics,
    ) -> Self {
        Self {
            inflight: AtomicUsize::new(0),
            lag_micros: AtomicU64::new(0),
            max_inflight,
            max_lag,
            statistics,
            sampler_stop: Mutex::new(None),
        }
    }

    /// Reserves a slot for a new request.
    ///
    /// The slot is released once the returned guard is dropped.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Result<InflightGuard, ProxyError> {
        let max_inflight = self.max_inflight;
        let reserved = self.inflight.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < max_inflight).then_some(n + 1)
        });
        if let Err(observed) = reserved {
            ProxyStatisticsInner::incr(&self.statistics.rejected_requests);
            return Err(ProxyError::TooManyRequests {
                limit: max_inflight,
                observed,
            });
        }

        let lag = self.lag();
        if lag > self.max_lag {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            ProxyStatisticsInner::incr(&self.statistics.rejected_requests);
            return Err(ProxyError::EventLoopLagged {
                limit: self.max_lag,
                observed: lag,
            });
        }

        self.statistics.inflight.fetch_add(1, Ordering::Relaxed);
        Ok(InflightGuard(self.clone()))
    }

    pub(crate) fn lag(&self) -> Duration {
        Duration::from_micros(self.lag_micros.load(Ordering::Relaxed))
    }

    pub(crate) fn record_lag(&self, lag: Duration) {
        let micros = u64::try_from(lag.as_micros()).unwrap_or(u64::MAX);
        self.lag_micros.store(micros, Ordering::Relaxed);
    }

    /// Starts measuring how late the runtime wakes up a sleeping task.
    ///
    /// The sampler exits once the backpressure state is dropped.
    pub(crate) fn start_lag_sampler(self: &Arc<Self>, interval: Duration) {
        let mut stop_tx = self.sampler_stop.lock();
        if stop_tx.is_some() {
            return;
        }

        let (tx, mut rx) = oneshot::channel();
        *stop_tx = Some(tx);

        let backpressure = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let start = Instant::now();
                tokio::select! {
                    _ = &mut rx => break,
                    _ = tokio::time::sleep(interval) => {},
                }

                let Some(backpressure) = backpressure.upgrade() else {
                    break;
                };
                let lag = start.elapsed().saturating_sub(interval);
                if lag > backpressure.max_lag {
                    warn!(lag = ?lag, limit = ?backpressure.max_lag, "Event loop is lagging.");
                }
                backpressure.record_lag(lag);
            }
        });
    }

    pub(crate) fn stop_lag_sampler(&self) {
        if let Some(tx) = self.sampler_stop.lock().take() {
            let _ = tx.send(());
        }
    }
}

pub(crate) struct InflightGuard(Arc<Backpressure>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.inflight.fetch_sub(1, Ordering::SeqCst);
        self.0.statistics.inflight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflight_limit() {
        let statistics = ProxyStatistics::default();
        let backpressure = Arc::new(Backpressure::new(
            2,
            Duration::from_millis(150),
            statistics.clone(),
        ));

        let first = backpressure.try_acquire().expect("Slot should be free");
        let _second = backpressure.try_acquire().expect("Slot should be free");
        assert_eq!(statistics.inflight(), 2);

        let err = backpressure.try_acquire().err().expect("Limit should be reached");
        assert!(matches!(
            err,
            ProxyError::TooManyRequests {
                limit: 2,
                observed: 2
            }
        ));
        assert_eq!(statistics.rejected_requests(), 1);

        drop(first);
        assert!(backpressure.try_acquire().is_ok());
    }

    #[test]
    fn test_event_loop_lag() {
        let backpressure = Arc::new(Backpressure::new(
            10,
            Duration::from_millis(150),
            ProxyStatistics::default(),
        ));

        backpressure.record_lag(Duration::from_millis(150));
        assert!(backpressure.try_acquire().is_ok());

        backpressure.record_lag(Duration::from_millis(151));
        let err = backpressure.try_acquire().err().expect("Lag should be rejected");
        assert_eq!(err.kind(), "event-loop-lagged");
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_sampler() {
        let backpressure = Arc::new(Backpressure::new(
            10,
            Duration::from_millis(150),
            ProxyStatistics::default(),
        ));
        backpressure.record_lag(Duration::from_secs(1));

        backpressure.start_lag_sampler(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(backpressure.lag(), Duration::ZERO);

        backpressure.stop_lag_sampler();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_sampler_does_not_keep_state_alive() {
        let backpressure = Arc::new(Backpressure::new(
            10,
            Duration::from_millis(150),
            ProxyStatistics::default(),
        ));
        backpressure.start_lag_sampler(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;

        let weak = Arc::downgrade(&backpressure);
        drop(backpressure);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_lag_rejection_releases_slot() {
        let backpressure = Arc::new(Backpressure::new(
            1,
            Duration::from_millis(150),
            ProxyStatistics::default(),
        ));

        backpressure.record_lag(Duration::from_secs(1));
        assert!(backpressure.try_acquire().is_err());

        backpressure.record_lag(Duration::ZERO);
        let _slot = backpressure.try_acquire().expect("Slot should be free");
        assert!(matches!(
            backpressure.try_acquire(),
            Err(ProxyError::TooManyRequests {
                limit: 1,
                observed: 1
            })
        ));
    }

    #[test]
    fn test_huge_lag_saturates() {
        let backpressure = Backpressure::new(
            1,
            Duration::from_millis(150),
            ProxyStatistics::default(),
        );
        backpressure.record_lag(Duration::MAX);
        assert_eq!(backpressure.lag(), Duration::from_micros(u64::MAX));
    }

    #[test]
    fn test_concurrent_acquire_respects_limit() {
        let backpressure = Arc::new(Backpressure::new(
            4,
            Duration::from_millis(150),
            ProxyStatistics::default(),
        ));
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles = (0..16)
            .map(|_| {
                let backpressure = backpressure.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    backpressure.try_acquire().ok()
                })
            })
            .collect::<Vec<_>>();

        let slots = handles
            .into_iter()
            .filter_map(|handle| handle.join().expect("Thread should not panic"))
            .collect::<Vec<_>>();
        assert_eq!(slots.len(), 4);
        assert_eq!(backpressure.inflight.load(Ordering::SeqCst), 4);

        drop(slots);
        assert_eq!(backpressure.inflight.load(Ordering::SeqCst), 0);
    }
}
