use std::cmp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

type TimeSource = dyn Fn() -> i64 + Send + Sync;

#[derive(Clone)]
/// The source of the local member's incarnation numbers.
///
/// Incarnations are derived from the wall clock in milliseconds but are
/// strictly increasing even if the wall clock stalls or jumps backwards.
pub struct IncarnationClock {
    last: Arc<AtomicI64>,
    now: Arc<TimeSource>,
}

impl Default for IncarnationClock {
    fn default() -> Self {
        Self::system()
    }
}

impl IncarnationClock {
    /// A clock backed by the system time.
    pub fn system() -> Self {
        Self::from_fn(unix_millis)
    }

    /// A clock backed by a custom time source returning milliseconds.
    pub fn from_fn(now: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            last: Arc::new(AtomicI64::new(0)),
            now: Arc::new(now),
        }
    }

    #[inline]
    /// The current time of the source in milliseconds.
    pub fn now_ms(&self) -> i64 {
        (self.now)()
    }

    /// Produces a new incarnation number larger than `after` and any number
    /// previously produced by this clock.
    pub fn next(&self, after: i64) -> i64 {
        let now = self.now_ms();
        let mut produced = 0;
        let _ = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                produced = cmp::max(now, cmp::max(after, prev).saturating_add(1));
                Some(produced)
            });
        produced
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
