//! The protocol driver running the failure detector.

mod iterator;
pub(crate) mod ping;
pub(crate) mod ping_req;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::Instant;

pub use self::ping_req::PingReqOutcome;
use self::iterator::MemberIterator;
use crate::error::{PingError, PingReqError};
use crate::state::SwimCore;

const ROUND_HISTORY: usize = 16;

#[derive(Debug)]
/// The result of a single protocol round.
pub enum TickOutcome {
    /// Another round was still in progress.
    Overlapping,
    /// No member was available to ping.
    NoTarget,
    /// The target acknowledged the direct ping.
    Acked { target: String },
    /// The direct ping failed and the target was probed through relays.
    Indirect {
        target: String,
        ping_error: PingError,
        result: Result<PingReqOutcome, PingReqError>,
    },
}

/// Drives the protocol rounds of the node.
///
/// Rounds can be run on a randomized period with [Gossip::start] or
/// manually with [Gossip::tick].
pub struct Gossip {
    core: Arc<SwimCore>,
    iterator: Mutex<MemberIterator>,
    pinging: AtomicBool,
    round_times: Mutex<VecDeque<Duration>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Gossip {
    pub(crate) fn new(core: Arc<SwimCore>) -> Self {
        Self {
            core,
            iterator: Mutex::new(MemberIterator::default()),
            pinging: AtomicBool::new(false),
            round_times: Mutex::new(VecDeque::with_capacity(ROUND_HISTORY)),
            stop_tx: Mutex::new(None),
        }
    }

    /// Starts running protocol rounds in the background.
    ///
    /// This is a no-op if the driver is already running.
    pub fn start(self: &Arc<Self>) {
        let mut stop_tx = self.stop_tx.lock();
        if stop_tx.is_some() {
            return;
        }

        let (tx, mut rx) = oneshot::channel();
        *stop_tx = Some(tx);

        let gossip = self.clone();
        tokio::spawn(async move {
            info!(self_addr = %gossip.core.address, "Started gossip protocol.");

            loop {
                let delay = gossip.protocol_delay();

                tokio::select! {
                    _ = &mut rx => break,
                    _ = tokio::time::sleep(delay) => {},
                }

                tokio::select! {
                    _ = &mut rx => break,
                    outcome = gossip.tick() => {
                        trace!(self_addr = %gossip.core.address, outcome = ?outcome, "Protocol round complete.");
                    },
                }
            }

            info!(self_addr = %gossip.core.address, "Stopped gossip protocol.");
        });
    }

    /// Stops the background protocol rounds.
    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Returns if the background rounds are running.
    pub fn is_running(&self) -> bool {
        self.stop_tx
            .lock()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Runs a single protocol round.
    ///
    /// Rounds never overlap, calling this while a round is in progress
    /// returns [TickOutcome::Overlapping] immediately.
    pub async fn tick(&self) -> TickOutcome {
        if self.pinging.swap(true, Ordering::SeqCst) {
            return TickOutcome::Overlapping;
        }
        let _guard = RoundGuard(&self.pinging);

        let start = Instant::now();
        let target = {
            let mut iterator = self.iterator.lock();
            self.core
                .with_rng(|rng| iterator.next(&self.core.membership, rng))
        };

        let Some(target) = target else {
            return TickOutcome::NoTarget;
        };

        let outcome = match ping::send_ping(&self.core, &target, Vec::new()).await {
            Ok(()) => TickOutcome::Acked { target },
            Err(ping_error) => {
                debug!(
                    self_addr = %self.core.address,
                    target_addr = %target,
                    error = %ping_error,
                    "Direct ping failed, sending ping-req."
                );
                let result = ping_req::send_ping_req(&self.core, &target).await;
                TickOutcome::Indirect {
                    target,
                    ping_error,
                    result,
                }
            },
        };

        self.record_round(start.elapsed());
        outcome
    }

    /// The delay before the next protocol round.
    ///
    /// This is the larger of the minimum protocol period and twice the
    /// median of the recent round times, plus a random jitter of up to
    /// half that delay.
    pub fn protocol_delay(&self) -> Duration {
        let median = {
            let rounds = self.round_times.lock();
            let mut sorted = rounds.iter().copied().collect::<Vec<_>>();
            sorted.sort_unstable();
            sorted.get(sorted.len() / 2).copied().unwrap_or_default()
        };

        let delay = self.core.config.min_protocol_period.max(median * 2);
        let max_jitter = delay.as_millis() as u64 / 2;
        let jitter = if max_jitter == 0 {
            0
        } else {
            self.core.with_rng(|rng| rng.gen_range(0..max_jitter))
        };

        delay + Duration::from_millis(jitter)
    }

    fn record_round(&self, elapsed: Duration) {
        let mut rounds = self.round_times.lock();
        if rounds.len() >= ROUND_HISTORY {
            rounds.pop_front();
        }
        rounds.push_back(elapsed);
    }
}

struct RoundGuard<'a>(&'a AtomicBool);

impl<'a> Drop for RoundGuard<'a> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
