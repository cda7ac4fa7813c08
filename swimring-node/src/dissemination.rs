use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::member::Change;
use crate::membership::Membership;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Notifications produced by the dissemination buffer.
pub enum DisseminationEvent {
    /// Every buffered change has been gossiped the maximum number of times.
    ChangesExhausted,
    /// A full membership sync was sent to the given member.
    FullSync { target: String },
}

#[derive(Debug, Clone)]
struct PendingChange {
    change: Change,
    piggyback_count: u32,
}

#[derive(Debug, Default)]
/// The changes issued for a single outgoing message.
pub struct Issued {
    pub changes: Vec<Change>,
    /// If the changes are the full membership rather than buffered changes.
    pub full_sync: bool,
}

struct DisseminationState {
    changes: HashMap<String, PendingChange>,
    max_piggyback_count: u32,
}

/// Buffers recent membership changes so they can be piggybacked onto
/// protocol messages.
///
/// Only the latest change per member is kept, each change is sent at most
/// `max_piggyback_count` times before it is dropped.
pub struct Dissemination {
    piggyback_factor: u32,
    max_changes_per_message: usize,
    state: Mutex<DisseminationState>,
    events: broadcast::Sender<DisseminationEvent>,
}

impl Dissemination {
    pub fn new(piggyback_factor: u32, max_changes_per_message: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        Self {
            piggyback_factor,
            max_changes_per_message,
            state: Mutex::new(DisseminationState {
                changes: HashMap::new(),
                max_piggyback_count: piggyback_factor.max(1),
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisseminationEvent> {
        self.events.subscribe()
    }

    /// Buffers a change, replacing any pending change about the same member.
    pub fn record_change(&self, change: Change) {
        self.state.lock().changes.insert(
            change.address.clone(),
            PendingChange {
                change,
                piggyback_count: 0,
            },
        );
    }

    /// Recomputes how often a change is piggybacked for the given cluster size.
    pub fn adjust_max_piggyback_count(&self, cluster_size: usize) {
        let max = max_piggyback_count(self.piggyback_factor, cluster_size);
        let mut state = self.state.lock();
        if state.max_piggyback_count != max {
            debug!(
                cluster_size = cluster_size,
                max_piggyback_count = max,
                "Adjusted max piggyback count."
            );
            state.max_piggyback_count = max;
        }
    }

    pub fn max_piggyback_count(&self) -> u32 {
        self.state.lock().max_piggyback_count
    }

    /// Issues the changes to attach to an outgoing ping or ping-req.
    pub fn issue_as_sender(&self) -> Vec<Change> {
        self.issue(|_| true)
    }

    /// Issues the changes to attach to a response to `source`.
    ///
    /// Changes which originated from `source` at its current incarnation are
    /// not sent back. If nothing is left to send while the checksums of both
    /// sides differ, the full membership is returned instead.
    pub fn issue_as_receiver(
        &self,
        source: &str,
        source_incarnation_number: i64,
        checksum: u32,
        membership: &Membership,
    ) -> Issued {
        let changes = self.issue(|change| {
            !(change.source == source
                && change.source_incarnation_number == source_incarnation_number)
        });

        if !changes.is_empty() || checksum == membership.checksum() {
            return Issued {
                changes,
                full_sync: false,
            };
        }

        debug!(
            target_addr = %source,
            remote_checksum = checksum,
            local_checksum = membership.checksum(),
            "Checksums differ, issuing full sync."
        );
        let _ = self.events.send(DisseminationEvent::FullSync {
            target: source.to_string(),
        });

        Issued {
            changes: membership.as_changes(),
            full_sync: true,
        }
    }

    fn issue(&self, filter: impl Fn(&Change) -> bool) -> Vec<Change> {
        let mut state = self.state.lock();
        if state.changes.is_empty() {
            return Vec::new();
        }

        let max_piggyback_count = state.max_piggyback_count;
        let mut candidates = state
            .changes
            .values()
            .filter(|pending| filter(&pending.change))
            .map(|pending| (pending.piggyback_count, pending.change.address.clone()))
            .collect::<Vec<_>>();
        candidates.sort_unstable();

        let mut issued = Vec::new();
        for (piggyback_count, address) in candidates {
            if piggyback_count >= max_piggyback_count {
                state.changes.remove(&address);
                continue;
            }

            if issued.len() >= self.max_changes_per_message {
                break;
            }

            if let Some(pending) = state.changes.get_mut(&address) {
                pending.piggyback_count += 1;
                issued.push(pending.change.clone());
            }
        }

        let exhausted = state.changes.is_empty();
        drop(state);

        if exhausted {
            let _ = self.events.send(DisseminationEvent::ChangesExhausted);
        }

        issued
    }

    /// Removes the pending change about the given member.
    pub fn remove(&self, address: &str) {
        self.state.lock().changes.remove(address);
    }

    /// Drops every pending change.
    pub fn clear(&self) {
        self.state.lock().changes.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `factor * ceil(log10(cluster_size + 1))`, at least `1`.
pub fn max_piggyback_count(factor: u32, cluster_size: usize) -> u32 {
    let scale = ((cluster_size + 1) as f64).log10().ceil() as u32;
    factor.saturating_mul(scale).max(1)
}
