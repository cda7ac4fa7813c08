use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::member::{Member, MemberStatus};
use crate::timers::{TimerHandle, Timers};

/// The receiver of expired state timers.
pub(crate) trait TransitionSink: Send + Sync + 'static {
    /// Called once a member stayed in `status` at `incarnation_number` for the
    /// whole of its timeout.
    fn on_expired(&self, address: &str, status: MemberStatus, incarnation_number: i64);
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TransitionTimeouts {
    pub suspect: Duration,
    pub faulty: Duration,
    pub tombstone: Duration,
}

/// Schedules the suspect -> faulty -> tombstone -> evicted transitions.
///
/// At most one timer exists per member, every schedule replaces the
/// previous timer of the member.
pub(crate) struct StateTransitions {
    local: String,
    timeouts: TransitionTimeouts,
    timers: Arc<dyn Timers>,
    sink: Weak<dyn TransitionSink>,
    scheduled: Mutex<HashMap<String, TimerHandle>>,
    disabled: AtomicBool,
}

impl StateTransitions {
    pub(crate) fn new(
        local: String,
        timeouts: TransitionTimeouts,
        timers: Arc<dyn Timers>,
        sink: Weak<dyn TransitionSink>,
    ) -> Self {
        Self {
            local,
            timeouts,
            timers,
            sink,
            scheduled: Mutex::new(HashMap::new()),
            disabled: AtomicBool::new(false),
        }
    }

    /// Schedules the next transition of the member based on its current status.
    pub(crate) fn schedule(&self, member: &Member) {
        if member.address == self.local || self.disabled.load(Ordering::Relaxed) {
            return;
        }

        let delay = match member.status {
            MemberStatus::Suspect => self.timeouts.suspect,
            MemberStatus::Faulty => self.timeouts.faulty,
            MemberStatus::Tombstone => self.timeouts.tombstone,
            MemberStatus::Alive | MemberStatus::Leave => {
                self.cancel(&member.address);
                return;
            },
        };

        let sink = self.sink.clone();
        let address = member.address.clone();
        let status = member.status;
        let incarnation_number = member.incarnation_number;
        let task = async move {
            if let Some(sink) = sink.upgrade() {
                sink.on_expired(&address, status, incarnation_number);
            }
        }
        .boxed();

        let handle = self.timers.after(delay, task);
        if let Some(previous) = self
            .scheduled
            .lock()
            .insert(member.address.clone(), handle)
        {
            previous.cancel();
        }

        trace!(
            target_addr = %member.address,
            status = %status,
            delay = ?delay,
            "Scheduled state transition."
        );
    }

    /// Cancels the pending timer of the member, if any.
    pub(crate) fn cancel(&self, address: &str) {
        if let Some(handle) = self.scheduled.lock().remove(address) {
            handle.cancel();
        }
    }

    /// Cancels every pending timer and stops accepting new ones.
    pub(crate) fn cancel_all(&self) {
        self.disabled.store(true, Ordering::Relaxed);
        for (_, handle) in self.scheduled.lock().drain() {
            handle.cancel();
        }
    }

    /// Allows timers to be scheduled again after [Self::cancel_all].
    pub(crate) fn enable(&self) {
        self.disabled.store(false, Ordering::Relaxed);
    }

    pub(crate) fn num_scheduled(&self) -> usize {
        self.scheduled.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timers::TokioTimers;

    #[derive(Default)]
    struct RecordingSink {
        expired: Mutex<Vec<(String, MemberStatus, i64)>>,
    }

    impl TransitionSink for RecordingSink {
        fn on_expired(&self, address: &str, status: MemberStatus, incarnation_number: i64) {
            self.expired
                .lock()
                .push((address.to_string(), status, incarnation_number));
        }
    }

    fn setup() -> (Arc<RecordingSink>, StateTransitions) {
        let sink = Arc::new(RecordingSink::default());
        let weak = Arc::downgrade(&sink) as Weak<dyn TransitionSink>;
        let transitions = StateTransitions::new(
            "local:1".to_string(),
            TransitionTimeouts {
                suspect: Duration::from_secs(5),
                faulty: Duration::from_secs(20),
                tombstone: Duration::from_secs(60),
            },
            Arc::new(TokioTimers),
            weak,
        );
        (sink, transitions)
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspect_expires() {
        let (sink, transitions) = setup();
        transitions.schedule(&Member::new("peer:1", MemberStatus::Suspect, 3));
        assert_eq!(transitions.num_scheduled(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            sink.expired.lock().as_slice(),
            &[("peer:1".to_string(), MemberStatus::Suspect, 3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_alive_cancels_pending_timer() {
        let (sink, transitions) = setup();
        transitions.schedule(&Member::new("peer:1", MemberStatus::Suspect, 3));
        transitions.schedule(&Member::new("peer:1", MemberStatus::Alive, 4));
        assert_eq!(transitions.num_scheduled(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(sink.expired.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_timer() {
        let (sink, transitions) = setup();
        transitions.schedule(&Member::new("peer:1", MemberStatus::Suspect, 3));
        transitions.schedule(&Member::new("peer:1", MemberStatus::Faulty, 3));
        assert_eq!(transitions.num_scheduled(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(sink.expired.lock().is_empty(), "Suspect timer was replaced");

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(
            sink.expired.lock().as_slice(),
            &[("peer:1".to_string(), MemberStatus::Faulty, 3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_member_and_cancel_all() {
        let (sink, transitions) = setup();
        transitions.schedule(&Member::new("local:1", MemberStatus::Suspect, 3));
        assert_eq!(transitions.num_scheduled(), 0);

        transitions.schedule(&Member::new("peer:1", MemberStatus::Suspect, 3));
        transitions.schedule(&Member::new("peer:2", MemberStatus::Tombstone, 3));
        transitions.cancel_all();
        transitions.cancel_all();
        transitions.schedule(&Member::new("peer:3", MemberStatus::Suspect, 3));
        assert_eq!(transitions.num_scheduled(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(sink.expired.lock().is_empty());
    }
}
