use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ProxyError;
use crate::statistics::{ProxyStatistics, ProxyStatisticsInner};

struct Pending {
    started: Instant,
    abort: oneshot::Sender<ProxyError>,
}

/// Tracks every request currently handled by the proxy so they can be
/// aborted when wedged or when the proxy is destroyed.
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Pending>>,
    destroyed: AtomicBool,
    statistics: ProxyStatistics,
    scanner_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl PendingRequests {
    pub(crate) fn new(statistics: ProxyStatistics) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(BTreeMap::new()),
            destroyed: AtomicBool::new(false),
            statistics,
            scanner_stop: Mutex::new(None),
        }
    }

    /// Runs the future as a tracked request.
    ///
    /// The future is dropped, including any retry it is waiting on, if the
    /// request is aborted before it completes.
    pub(crate) async fn track<T, F>(&self, fut: F) -> Result<T, ProxyError>
    where
        F: Future<Output = Result<T, ProxyError>>,
    {
        if self.is_destroyed() {
            return Err(ProxyError::Destroyed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            id,
            Pending {
                started: Instant::now(),
                abort: tx,
            },
        );
        let _guard = PendingGuard { pending: self, id };

        tokio::select! {
            result = fut => result,
            reason = rx => Err(reason.unwrap_or(ProxyError::Destroyed)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Aborts every request which has been pending for longer than `timeout`.
    pub(crate) fn evict_wedged(&self, timeout: Duration) -> usize {
        let wedged = {
            let mut entries = self.entries.lock();
            let ids = entries
                .iter()
                .filter(|(_, pending)| pending.started.elapsed() >= timeout)
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();

            ids.into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect::<Vec<_>>()
        };

        let num_wedged = wedged.len();
        for pending in wedged {
            ProxyStatisticsInner::incr(&self.statistics.wedged_requests);
            let _ = pending.abort.send(ProxyError::WedgedRequest { timeout });
        }

        if num_wedged > 0 {
            warn!(
                num_wedged = num_wedged,
                timeout = ?timeout,
                "Aborted wedged requests."
            );
        }

        num_wedged
    }

    /// Aborts every pending request and rejects any future ones.
    pub(crate) fn destroy(&self) -> usize {
        self.destroyed.store(true, Ordering::SeqCst);
        self.stop_wedge_scanner();

        let entries = std::mem::take(&mut *self.entries.lock());
        let num_aborted = entries.len();
        for pending in entries.into_values() {
            let _ = pending.abort.send(ProxyError::Destroyed);
        }

        num_aborted
    }

    /// Starts periodically evicting wedged requests.
    ///
    /// The scanner exits once the tracker is dropped.
    pub(crate) fn start_wedge_scanner(
        self: &Arc<Self>,
        timeout: Duration,
        interval: Duration,
    ) {
        let mut stop_tx = self.scanner_stop.lock();
        if stop_tx.is_some() {
            return;
        }

        let (tx, mut rx) = oneshot::channel();
        *stop_tx = Some(tx);

        let pending = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = tokio::time::sleep(interval) => {},
                }

                let Some(pending) = pending.upgrade() else {
                    break;
                };
                pending.evict_wedged(timeout);
            }
        });
    }

    fn stop_wedge_scanner(&self) {
        if let Some(tx) = self.scanner_stop.lock().take() {
            let _ = tx.send(());
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl<'a> Drop for PendingGuard<'a> {
    fn drop(&mut self) {
        self.pending.entries.lock().remove(&self.id);
    }
}
