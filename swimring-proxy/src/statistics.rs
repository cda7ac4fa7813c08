use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the request proxy.
pub struct ProxyStatistics(Arc<ProxyStatisticsInner>);

impl Deref for ProxyStatistics {
    type Target = ProxyStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct ProxyStatisticsInner {
    pub(crate) inflight: Counter,

    pub(crate) requests_forwarded: Counter,
    pub(crate) requests_received: Counter,
    pub(crate) requests_handled_locally: Counter,
    pub(crate) retries: Counter,
    pub(crate) local_reroutes: Counter,
    pub(crate) checksum_mismatches: Counter,
    pub(crate) keys_not_owned: Counter,
    pub(crate) rejected_requests: Counter,
    pub(crate) wedged_requests: Counter,
}

impl ProxyStatisticsInner {
    /// The number of requests currently in flight.
    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    /// The number of forwarding attempts sent to other members.
    pub fn requests_forwarded(&self) -> u64 {
        self.requests_forwarded.load(Ordering::Relaxed)
    }

    /// The number of requests received from other members.
    pub fn requests_received(&self) -> u64 {
        self.requests_received.load(Ordering::Relaxed)
    }

    pub fn requests_handled_locally(&self) -> u64 {
        self.requests_handled_locally.load(Ordering::Relaxed)
    }

    /// The number of retried forwarding attempts.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// The number of retries which ended up being handled by the local node.
    pub fn local_reroutes(&self) -> u64 {
        self.local_reroutes.load(Ordering::Relaxed)
    }

    /// The number of received requests carrying a different ring checksum.
    pub fn checksum_mismatches(&self) -> u64 {
        self.checksum_mismatches.load(Ordering::Relaxed)
    }

    pub fn keys_not_owned(&self) -> u64 {
        self.keys_not_owned.load(Ordering::Relaxed)
    }

    /// The number of requests rejected by the backpressure limits.
    pub fn rejected_requests(&self) -> u64 {
        self.rejected_requests.load(Ordering::Relaxed)
    }

    pub fn wedged_requests(&self) -> u64 {
        self.wedged_requests.load(Ordering::Relaxed)
    }

    pub(crate) fn incr(counter: &Counter) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
