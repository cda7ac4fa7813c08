use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use swimring_hashring::{HashRing, RingEvent};
use tokio::sync::{broadcast, watch};

use crate::clock::IncarnationClock;
use crate::config::SwimConfig;
use crate::dissemination::{Dissemination, Issued};
use crate::member::{labels_to_wire, Change, Member, MemberStatus};
use crate::membership::Membership;
use crate::rpc::{ProtocolClient, ServiceRegistry, Transport};
use crate::statistics::{ClusterStatistics, ClusterStatisticsInner};
use crate::timers::Timers;
use crate::transitions::{StateTransitions, TransitionSink, TransitionTimeouts};

const RING_EVENT_BUFFER: usize = 64;

/// The state shared by every part of a running node.
///
/// Membership, dissemination and the ring are only ever mutated together
/// through [SwimCore::apply_changes].
pub(crate) struct SwimCore {
    pub(crate) config: SwimConfig,
    pub(crate) address: String,
    pub(crate) membership: Membership,
    pub(crate) dissemination: Dissemination,
    pub(crate) transitions: StateTransitions,
    pub(crate) clock: IncarnationClock,
    pub(crate) timers: Arc<dyn Timers>,
    pub(crate) client: ProtocolClient,
    pub(crate) registry: ServiceRegistry,
    pub(crate) statistics: ClusterStatistics,
    ring: RwLock<HashRing>,
    ring_events: broadcast::Sender<RingEvent>,
    rng: Mutex<SmallRng>,
    version: watch::Sender<u64>,
    deny_joins: AtomicBool,
}

impl SwimCore {
    pub(crate) fn new(
        address: String,
        config: SwimConfig,
        transport: Arc<dyn Transport>,
        timers: Arc<dyn Timers>,
        clock: IncarnationClock,
    ) -> Arc<Self> {
        let mut local = Member::new(address.clone(), MemberStatus::Alive, clock.next(0));
        local.labels = config.labels.clone();

        let rng = match config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let (ring_events, _) = broadcast::channel(RING_EVENT_BUFFER);
        let (version, _) = watch::channel(0);

        let core = Arc::new_cyclic(|weak: &Weak<SwimCore>| {
            let sink: Weak<dyn TransitionSink> = weak.clone();
            let timeouts = TransitionTimeouts {
                suspect: config.suspect_timeout,
                faulty: config.faulty_timeout,
                tombstone: config.tombstone_timeout,
            };

            Self {
                membership: Membership::new(local),
                dissemination: Dissemination::new(
                    config.piggyback_factor,
                    config.max_changes_per_message,
                ),
                transitions: StateTransitions::new(
                    address.clone(),
                    timeouts,
                    timers.clone(),
                    sink,
                ),
                ring: RwLock::new(HashRing::with_servers([address.clone()])),
                client: ProtocolClient::new(transport),
                registry: ServiceRegistry::default(),
                statistics: ClusterStatistics::default(),
                rng: Mutex::new(rng),
                deny_joins: AtomicBool::new(false),
                ring_events,
                version,
                address,
                config,
                timers,
                clock,
            }
        });

        core.dissemination.adjust_max_piggyback_count(1);
        core.refresh_statistics();
        core
    }

    #[inline]
    pub(crate) fn local_incarnation(&self) -> i64 {
        self.membership.local_member().incarnation_number
    }

    /// Applies a batch of changes to the membership, dissemination buffer,
    /// ring and transition timers.
    ///
    /// Returns the changes which altered the membership.
    pub(crate) fn apply_changes(&self, changes: &[Change]) -> Vec<Change> {
        let outcome = self.membership.update(changes, &self.clock);
        if outcome.applied.is_empty() {
            return Vec::new();
        }

        if let Some(incarnation) = outcome.refuted {
            ClusterStatisticsInner::incr(&self.statistics.refutations);
            info!(
                self_addr = %self.address,
                incarnation = incarnation,
                "Refuted claim about the local member."
            );
        }

        for change in outcome.applied.iter() {
            self.dissemination.record_change(change.clone());
        }
        self.dissemination
            .adjust_max_piggyback_count(self.membership.len());

        let mut to_add = Vec::new();
        let mut to_remove = Vec::new();
        for change in outcome.applied.iter() {
            let routable = self
                .membership
                .find(&change.address)
                .map(|m| m.status.is_routable())
                .unwrap_or(false);
            if routable {
                to_add.push(change.address.clone());
            } else {
                to_remove.push(change.address.clone());
            }
        }
        let event = self.ring.write().add_remove_servers(to_add, to_remove);
        if let Some(event) = event {
            debug!(
                self_addr = %self.address,
                checksum = event.checksum(),
                "Hash ring changed."
            );
            let _ = self.ring_events.send(event);
        }

        for change in outcome.applied.iter() {
            if change.address != self.address {
                log_change(&self.address, change);
            }

            if let Some(member) = self.membership.find(&change.address) {
                self.transitions.schedule(&member);
            }
        }

        self.refresh_statistics();
        outcome.applied
    }

    /// Issues the changes for a response to `source`, see [Dissemination::issue_as_receiver].
    pub(crate) fn issue_as_receiver(
        &self,
        source: &str,
        source_incarnation_number: i64,
        checksum: u32,
    ) -> Issued {
        let issued = self.dissemination.issue_as_receiver(
            source,
            source_incarnation_number,
            checksum,
            &self.membership,
        );
        if issued.full_sync {
            ClusterStatisticsInner::incr(&self.statistics.full_syncs);
        }
        issued
    }

    pub(crate) fn make_alive(&self, address: &str, incarnation_number: i64) -> Vec<Change> {
        self.make_status(address, MemberStatus::Alive, incarnation_number)
    }

    pub(crate) fn make_suspect(&self, address: &str, incarnation_number: i64) -> Vec<Change> {
        let applied = self.make_status(address, MemberStatus::Suspect, incarnation_number);
        if !applied.is_empty() {
            ClusterStatisticsInner::incr(&self.statistics.suspects_marked);
        }
        applied
    }

    pub(crate) fn make_faulty(&self, address: &str, incarnation_number: i64) -> Vec<Change> {
        self.make_status(address, MemberStatus::Faulty, incarnation_number)
    }

    pub(crate) fn make_leave(&self, address: &str, incarnation_number: i64) -> Vec<Change> {
        self.make_status(address, MemberStatus::Leave, incarnation_number)
    }

    pub(crate) fn make_tombstone(
        &self,
        address: &str,
        incarnation_number: i64,
    ) -> Vec<Change> {
        self.make_status(address, MemberStatus::Tombstone, incarnation_number)
    }

    fn make_status(
        &self,
        address: &str,
        status: MemberStatus,
        incarnation_number: i64,
    ) -> Vec<Change> {
        let mut change = Change::new(
            address,
            status,
            incarnation_number,
            self.address.as_str(),
            self.local_incarnation(),
        );
        if let Some(member) = self.membership.find(address) {
            change.labels = labels_to_wire(&member.labels);
        }

        self.apply_changes(&[change])
    }

    /// Removes a tombstoned member entirely.
    pub(crate) fn evict(&self, address: &str) -> bool {
        if !self.membership.evict(address) {
            return false;
        }

        self.transitions.cancel(address);
        self.dissemination.remove(address);
        if let Some(event) = self.ring.write().remove_server(address) {
            let _ = self.ring_events.send(event);
        }

        info!(self_addr = %self.address, target_addr = %address, "Evicted member.");
        self.refresh_statistics();
        true
    }

    pub(crate) fn with_rng<T>(&self, func: impl FnOnce(&mut SmallRng) -> T) -> T {
        let mut rng = self.rng.lock();
        func(&mut rng)
    }

    pub(crate) fn lookup(&self, key: impl AsRef<[u8]>) -> Option<String> {
        self.ring.read().lookup(key).map(ToString::to_string)
    }

    pub(crate) fn lookup_n(&self, key: impl AsRef<[u8]>, n: usize) -> Vec<String> {
        self.ring
            .read()
            .lookup_n(key, n)
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    pub(crate) fn ring_checksum(&self) -> u32 {
        self.ring.read().checksum()
    }

    pub(crate) fn ring_servers(&self) -> Vec<String> {
        let mut servers = self
            .ring
            .read()
            .servers()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        servers.sort_unstable();
        servers
    }

    pub(crate) fn subscribe_ring(&self) -> broadcast::Receiver<RingEvent> {
        self.ring_events.subscribe()
    }

    pub(crate) fn watch_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub(crate) fn set_deny_joins(&self, deny: bool) {
        self.deny_joins.store(deny, Ordering::Relaxed);
    }

    pub(crate) fn denies_joins(&self) -> bool {
        self.deny_joins.load(Ordering::Relaxed)
    }

    fn refresh_statistics(&self) {
        self.statistics
            .set_member_counts(self.membership.status_counts());
        self.version.send_modify(|v| *v += 1);
    }
}

impl TransitionSink for SwimCore {
    fn on_expired(&self, address: &str, status: MemberStatus, incarnation_number: i64) {
        let unchanged = self
            .membership
            .find(address)
            .map(|m| m.status == status && m.incarnation_number == incarnation_number)
            .unwrap_or(false);
        if !unchanged {
            return;
        }

        match status {
            MemberStatus::Suspect => {
                self.make_faulty(address, incarnation_number);
            },
            MemberStatus::Faulty => {
                self.make_tombstone(address, incarnation_number);
            },
            MemberStatus::Tombstone => {
                self.evict(address);
            },
            MemberStatus::Alive | MemberStatus::Leave => {},
        }
    }
}

fn log_change(self_addr: &str, change: &Change) {
    match change.status {
        MemberStatus::Alive => debug!(
            self_addr = %self_addr,
            target_addr = %change.address,
            incarnation = change.incarnation_number,
            source = %change.source,
            "Member is alive."
        ),
        status => info!(
            self_addr = %self_addr,
            target_addr = %change.address,
            incarnation = change.incarnation_number,
            source = %change.source,
            status = %status,
            "Member status changed."
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use rkyv::AlignedVec;

    use super::*;
    use crate::error::TransportError;
    use crate::timers::TokioTimers;

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn send(
            &self,
            target: &str,
            _endpoint: &str,
            _payload: AlignedVec,
            _timeout: Duration,
        ) -> Result<AlignedVec, TransportError> {
            Err(TransportError::Connection {
                target: target.to_string(),
                message: "unreachable".to_string(),
            })
        }

        async fn listen(
            &self,
            _local: &str,
            _registry: ServiceRegistry,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn make_core(config: SwimConfig) -> Arc<SwimCore> {
        SwimCore::new(
            "127.0.0.1:3000".to_string(),
            config,
            Arc::new(NoopTransport),
            Arc::new(TokioTimers),
            IncarnationClock::from_fn(|| 1_000),
        )
    }

    #[tokio::test]
    async fn test_changes_feed_ring_and_dissemination() {
        let core = make_core(SwimConfig::default());
        let mut ring_events = core.subscribe_ring();
        assert_eq!(core.ring_servers(), vec!["127.0.0.1:3000".to_string()]);

        let applied = core.apply_changes(&[
            Change::new("127.0.0.1:3001", MemberStatus::Alive, 1, "127.0.0.1:3001", 1),
            Change::new("127.0.0.1:3002", MemberStatus::Suspect, 1, "127.0.0.1:3001", 1),
        ]);
        assert_eq!(applied.len(), 2);
        assert_eq!(core.dissemination.len(), 2);
        assert_eq!(core.ring_servers().len(), 3);
        assert!(ring_events.try_recv().is_ok());
        assert_eq!(core.statistics.num_members(MemberStatus::Suspect), 1);

        core.make_faulty("127.0.0.1:3002", 1);
        assert_eq!(core.ring_servers().len(), 2);
        assert_eq!(core.statistics.num_dead_members(), 1);
        assert_eq!(core.lookup("key"), core.lookup_n("key", 1).pop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspect_walks_through_to_eviction() {
        let config = SwimConfig::default().with_state_timeouts(
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20),
        );
        let core = make_core(config);
        let peer = "127.0.0.1:3001";

        core.make_alive(peer, 1);
        core.make_suspect(peer, 1);
        assert_eq!(core.statistics.suspects_marked(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(core.membership.find(peer).unwrap().status, MemberStatus::Faulty);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(
            core.membership.find(peer).unwrap().status,
            MemberStatus::Tombstone
        );

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert!(core.membership.find(peer).is_none());
        assert_eq!(core.transitions.num_scheduled(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refuted_suspect_cancels_timer() {
        let config = SwimConfig::default().with_state_timeouts(
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20),
        );
        let core = make_core(config);
        let peer = "127.0.0.1:3001";

        core.make_alive(peer, 1);
        core.make_suspect(peer, 1);
        core.apply_changes(&[Change::new(peer, MemberStatus::Alive, 2, peer, 2)]);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(core.membership.find(peer).unwrap().status, MemberStatus::Alive);
    }

    #[tokio::test]
    async fn test_local_refutation_is_disseminated() {
        let core = make_core(SwimConfig::default());
        let local = core.local_incarnation();

        let applied = core.apply_changes(&[Change::new(
            "127.0.0.1:3000",
            MemberStatus::Suspect,
            local,
            "127.0.0.1:3001",
            1,
        )]);
        assert_eq!(applied.len(), 1);
        assert!(core.local_incarnation() > local);
        assert_eq!(core.statistics.refutations(), 1);

        let issued = core.dissemination.issue_as_sender();
        assert_eq!(issued[0].status, MemberStatus::Alive);
        assert_eq!(issued[0].incarnation_number, core.local_incarnation());
    }
}
