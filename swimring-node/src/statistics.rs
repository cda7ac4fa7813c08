use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::member::MemberStatus;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the membership protocol.
pub struct ClusterStatistics(Arc<ClusterStatisticsInner>);

impl Deref for ClusterStatistics {
    type Target = ClusterStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct ClusterStatisticsInner {
    pub(crate) num_alive_members: Counter,
    pub(crate) num_suspect_members: Counter,
    pub(crate) num_faulty_members: Counter,
    pub(crate) num_leave_members: Counter,
    pub(crate) num_tombstone_members: Counter,

    pub(crate) pings_sent: Counter,
    pub(crate) ping_failures: Counter,
    pub(crate) ping_reqs_sent: Counter,
    pub(crate) suspects_marked: Counter,
    pub(crate) full_syncs: Counter,
    pub(crate) refutations: Counter,
    pub(crate) join_attempts: Counter,
    pub(crate) heal_attempts: Counter,
}

impl ClusterStatisticsInner {
    /// The number of members the node currently believes are in the given status.
    pub fn num_members(&self, status: MemberStatus) -> u64 {
        self.gauge(status).load(Ordering::Relaxed)
    }

    /// The number of currently alive members the node is aware of.
    pub fn num_alive_members(&self) -> u64 {
        self.num_members(MemberStatus::Alive)
    }

    /// The number of members the node currently believes are dead.
    pub fn num_dead_members(&self) -> u64 {
        self.num_members(MemberStatus::Faulty)
    }

    /// The number of direct pings sent.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }

    /// The number of direct pings which were not acknowledged.
    pub fn ping_failures(&self) -> u64 {
        self.ping_failures.load(Ordering::Relaxed)
    }

    /// The number of ping-req requests sent to relays.
    pub fn ping_reqs_sent(&self) -> u64 {
        self.ping_reqs_sent.load(Ordering::Relaxed)
    }

    /// The number of times this node declared another member suspect.
    pub fn suspects_marked(&self) -> u64 {
        self.suspects_marked.load(Ordering::Relaxed)
    }

    /// The number of full membership syncs this node answered with.
    pub fn full_syncs(&self) -> u64 {
        self.full_syncs.load(Ordering::Relaxed)
    }

    /// The number of times the local member refuted a claim about itself.
    pub fn refutations(&self) -> u64 {
        self.refutations.load(Ordering::Relaxed)
    }

    /// The number of join groups sent while joining.
    pub fn join_attempts(&self) -> u64 {
        self.join_attempts.load(Ordering::Relaxed)
    }

    /// The number of faulty members contacted by the partition healer.
    pub fn heal_attempts(&self) -> u64 {
        self.heal_attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn set_member_counts(&self, counts: [u64; 5]) {
        for (status, count) in STATUSES.iter().zip(counts) {
            self.gauge(*status).store(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn incr(counter: &Counter) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn gauge(&self, status: MemberStatus) -> &Counter {
        match status {
            MemberStatus::Alive => &self.num_alive_members,
            MemberStatus::Suspect => &self.num_suspect_members,
            MemberStatus::Faulty => &self.num_faulty_members,
            MemberStatus::Leave => &self.num_leave_members,
            MemberStatus::Tombstone => &self.num_tombstone_members,
        }
    }
}

pub(crate) const STATUSES: [MemberStatus; 5] = [
    MemberStatus::Alive,
    MemberStatus::Suspect,
    MemberStatus::Faulty,
    MemberStatus::Leave,
    MemberStatus::Tombstone,
];
