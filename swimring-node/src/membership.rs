use std::collections::BTreeMap;

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::broadcast;

use crate::clock::IncarnationClock;
use crate::member::{labels_to_wire, Change, Labels, Member, MemberStatus};
use crate::statistics::STATUSES;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Notifications produced by the membership list.
pub enum MembershipEvent {
    /// A batch of changes was applied.
    MemberChanged { changes: Vec<Change> },
    /// A claim about the local member was refuted by reincarnating.
    Refuted { incarnation_number: i64 },
}

#[derive(Debug, Default)]
/// The outcome of applying a batch of changes.
pub struct UpdateOutcome {
    /// The changes which altered the membership, including refutations.
    pub applied: Vec<Change>,
    /// The new incarnation number of the local member if it had to refute a claim.
    pub refuted: Option<i64>,
}

struct MembershipState {
    members: BTreeMap<String, Member>,
    checksum: u32,
}

/// The local view of every member of the cluster.
pub struct Membership {
    local: String,
    state: RwLock<MembershipState>,
    events: broadcast::Sender<MembershipEvent>,
}

impl Membership {
    /// Creates a membership list containing only the local member.
    pub fn new(local: Member) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let address = local.address.clone();

        let mut members = BTreeMap::new();
        members.insert(address.clone(), local);
        let checksum = compute_checksum(&members);

        Self {
            local: address,
            state: RwLock::new(MembershipState { members, checksum }),
            events,
        }
    }

    #[inline]
    /// The address of the local member.
    pub fn local_address(&self) -> &str {
        &self.local
    }

    /// The current state of the local member.
    pub fn local_member(&self) -> Member {
        self.find(&self.local)
            .unwrap_or_else(|| Member::new(self.local.clone(), MemberStatus::Alive, 0))
    }

    /// Subscribes to the changes applied to the membership.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    /// Applies a batch of changes following the membership ordering rules.
    ///
    /// Claims about the local member which would mark it as anything but alive
    /// are refuted by reincarnating the local member, unless it is leaving.
    pub fn update(&self, changes: &[Change], clock: &IncarnationClock) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();
        if changes.is_empty() {
            return outcome;
        }

        {
            let mut state = self.state.write();

            for change in changes {
                if change.address == self.local {
                    self.apply_local(&mut state, change, clock, &mut outcome);
                    continue;
                }

                let apply = match state.members.get(&change.address) {
                    None => change.status != MemberStatus::Tombstone,
                    Some(member) => {
                        member.is_superseded_by(change.status, change.incarnation_number)
                    },
                };

                if apply {
                    state
                        .members
                        .insert(change.address.clone(), Member::from(change));
                    outcome.applied.push(change.clone());
                }
            }

            if !outcome.applied.is_empty() {
                state.checksum = compute_checksum(&state.members);
            }
        }

        if let Some(incarnation_number) = outcome.refuted {
            let _ = self
                .events
                .send(MembershipEvent::Refuted { incarnation_number });
        }
        if !outcome.applied.is_empty() {
            let _ = self.events.send(MembershipEvent::MemberChanged {
                changes: outcome.applied.clone(),
            });
        }

        outcome
    }

    fn apply_local(
        &self,
        state: &mut MembershipState,
        change: &Change,
        clock: &IncarnationClock,
        outcome: &mut UpdateOutcome,
    ) {
        let Some(local) = state.members.get_mut(&self.local) else {
            return;
        };

        let from_self = change.source == self.local;
        if from_self {
            // Our own announcements, e.g. a graceful leave or relabelling.
            if local.is_superseded_by(change.status, change.incarnation_number)
                || (change.incarnation_number == local.incarnation_number
                    && change.status == local.status
                    && labels_differ(&local.labels, change))
            {
                *local = Member::from(change);
                outcome.applied.push(change.clone());
            }
            return;
        }

        if local.status == MemberStatus::Leave {
            return;
        }

        let stale = change.incarnation_number < local.incarnation_number;
        let harmless = change.status == MemberStatus::Alive
            && change.incarnation_number <= local.incarnation_number;
        if stale || harmless {
            return;
        }

        let incarnation_number = clock.next(change.incarnation_number);
        local.status = MemberStatus::Alive;
        local.incarnation_number = incarnation_number;

        outcome.refuted = Some(incarnation_number);
        outcome
            .applied
            .push(local.to_change(&self.local, incarnation_number));
    }

    /// Removes a tombstoned member from the list entirely.
    ///
    /// Returns `false` if the member is unknown or not tombstoned.
    pub fn evict(&self, address: &str) -> bool {
        let mut state = self.state.write();

        let is_tombstone = state
            .members
            .get(address)
            .map(|m| m.status == MemberStatus::Tombstone)
            .unwrap_or(false);
        if !is_tombstone || address == self.local {
            return false;
        }

        state.members.remove(address);
        state.checksum = compute_checksum(&state.members);
        true
    }

    pub fn find(&self, address: &str) -> Option<Member> {
        self.state.read().members.get(address).cloned()
    }

    #[inline]
    /// The checksum of every non-tombstoned member.
    pub fn checksum(&self) -> u32 {
        self.state.read().checksum
    }

    /// The number of members including the local member and tombstones.
    pub fn len(&self) -> usize {
        self.state.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of every member ordered by address.
    pub fn snapshot(&self) -> Vec<Member> {
        self.state.read().members.values().cloned().collect()
    }

    /// The full membership expressed as changes originating from the local member.
    pub fn as_changes(&self) -> Vec<Change> {
        let state = self.state.read();
        let source_incarnation = state
            .members
            .get(&self.local)
            .map(|m| m.incarnation_number)
            .unwrap_or_default();

        state
            .members
            .values()
            .map(|member| member.to_change(&self.local, source_incarnation))
            .collect()
    }

    /// The addresses of every alive or suspect member other than the local member.
    pub fn pingable_addresses(&self) -> Vec<String> {
        self.state
            .read()
            .members
            .values()
            .filter(|m| m.address != self.local && m.status.is_pingable())
            .map(|m| m.address.clone())
            .collect()
    }

    /// Selects up to `n` random pingable members which are not listed in `excluding`.
    pub fn random_pingable_members<R: Rng + ?Sized>(
        &self,
        n: usize,
        excluding: &[&str],
        rng: &mut R,
    ) -> Vec<String> {
        let mut candidates = self.pingable_addresses();
        candidates.retain(|addr| !excluding.contains(&addr.as_str()));
        candidates.shuffle(rng);
        candidates.truncate(n);
        candidates
    }

    /// The addresses of every member currently considered faulty.
    pub fn faulty_addresses(&self) -> Vec<String> {
        self.state
            .read()
            .members
            .values()
            .filter(|m| m.status == MemberStatus::Faulty)
            .map(|m| m.address.clone())
            .collect()
    }

    /// The number of members per status in the order alive, suspect, faulty,
    /// leave, tombstone.
    pub fn status_counts(&self) -> [u64; 5] {
        let state = self.state.read();
        let mut counts = [0; 5];
        for member in state.members.values() {
            if let Some(idx) = STATUSES.iter().position(|s| *s == member.status) {
                counts[idx] += 1;
            }
        }
        counts
    }
}

fn labels_differ(labels: &Labels, change: &Change) -> bool {
    labels_to_wire(labels) != change.labels
}

fn compute_checksum(members: &BTreeMap<String, Member>) -> u32 {
    let repr = members
        .values()
        .filter(|m| m.status != MemberStatus::Tombstone)
        .map(|m| m.checksum_repr())
        .collect::<Vec<_>>()
        .join(";");

    crc32fast::hash(repr.as_bytes())
}

#[cfg(test)]
mod tests {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;

    const LOCAL: &str = "127.0.0.1:3000";

    fn membership() -> (Membership, IncarnationClock) {
        let clock = IncarnationClock::from_fn(|| 100);
        let local = Member::new(LOCAL, MemberStatus::Alive, clock.next(0));
        (Membership::new(local), clock)
    }

    fn change(addr: &str, status: MemberStatus, inc: i64) -> Change {
        Change::new(addr, status, inc, "127.0.0.1:3001", 1)
    }

    #[test]
    fn test_incarnation_ordering() {
        let (membership, clock) = membership();
        let peer = "127.0.0.1:3002";

        let outcome = membership.update(&[change(peer, MemberStatus::Alive, 5)], &clock);
        assert_eq!(outcome.applied.len(), 1);

        let ignored = [
            change(peer, MemberStatus::Suspect, 4),
            change(peer, MemberStatus::Alive, 5),
        ];
        assert!(membership.update(&ignored, &clock).applied.is_empty());

        let outcome = membership.update(&[change(peer, MemberStatus::Suspect, 5)], &clock);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(membership.find(peer).unwrap().status, MemberStatus::Suspect);

        let outcome = membership.update(&[change(peer, MemberStatus::Alive, 5)], &clock);
        assert!(outcome.applied.is_empty(), "Weaker status must not apply on a tie");

        let outcome = membership.update(&[change(peer, MemberStatus::Alive, 6)], &clock);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(membership.find(peer).unwrap().status, MemberStatus::Alive);
    }

    #[test]
    fn test_update_is_idempotent() {
        let (membership, clock) = membership();
        let changes = vec![
            change("127.0.0.1:3002", MemberStatus::Alive, 5),
            change("127.0.0.1:3003", MemberStatus::Suspect, 2),
            change("127.0.0.1:3004", MemberStatus::Faulty, 9),
        ];

        let first = membership.update(&changes, &clock);
        assert_eq!(first.applied.len(), 3);
        let checksum = membership.checksum();

        let second = membership.update(&changes, &clock);
        assert!(second.applied.is_empty());
        assert_eq!(membership.checksum(), checksum);
    }

    #[test]
    fn test_checksum_is_order_independent() {
        let (a, clock_a) = membership();
        let (b, clock_b) = membership();
        let changes = vec![
            change("127.0.0.1:3002", MemberStatus::Alive, 5),
            change("127.0.0.1:3003", MemberStatus::Suspect, 2),
            change("127.0.0.1:3002", MemberStatus::Faulty, 5),
        ];
        let mut reversed = changes.clone();
        reversed.reverse();

        a.update(&changes, &clock_a);
        b.update(&reversed, &clock_b);
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_unknown_tombstone_is_ignored() {
        let (membership, clock) = membership();
        let outcome = membership.update(
            &[change("127.0.0.1:3002", MemberStatus::Tombstone, 1)],
            &clock,
        );

        assert!(outcome.applied.is_empty());
        assert!(membership.find("127.0.0.1:3002").is_none());
    }

    #[test]
    fn test_tombstones_are_excluded_from_checksum() {
        let (membership, clock) = membership();
        let before = membership.checksum();
        let peer = "127.0.0.1:3002";

        membership.update(&[change(peer, MemberStatus::Alive, 1)], &clock);
        assert_ne!(membership.checksum(), before);

        membership.update(&[change(peer, MemberStatus::Tombstone, 1)], &clock);
        assert_eq!(membership.checksum(), before);

        assert!(membership.evict(peer));
        assert!(membership.find(peer).is_none());
        assert!(!membership.evict(peer));
    }

    #[test]
    fn test_evict_requires_tombstone() {
        let (membership, clock) = membership();
        membership.update(&[change("127.0.0.1:3002", MemberStatus::Faulty, 1)], &clock);
        assert!(!membership.evict("127.0.0.1:3002"));
        assert!(!membership.evict(LOCAL));
    }

    #[test]
    fn test_refutes_claims_about_local_member() {
        let (membership, clock) = membership();
        let mut events = membership.subscribe();
        let local = membership.local_member();

        let claim = change(LOCAL, MemberStatus::Suspect, local.incarnation_number);
        let outcome = membership.update(&[claim], &clock);

        let refuted = outcome.refuted.expect("Local member should refute");
        assert!(refuted > local.incarnation_number);
        assert_eq!(outcome.applied.len(), 1);
        assert_eq!(outcome.applied[0].status, MemberStatus::Alive);
        assert_eq!(outcome.applied[0].source, LOCAL);

        let current = membership.local_member();
        assert_eq!(current.status, MemberStatus::Alive);
        assert_eq!(current.incarnation_number, refuted);

        assert_eq!(
            events.try_recv().unwrap(),
            MembershipEvent::Refuted {
                incarnation_number: refuted
            }
        );
    }

    #[test]
    fn test_refutes_future_claims_above_claimed_incarnation() {
        let (membership, clock) = membership();

        let claim = change(LOCAL, MemberStatus::Faulty, 50_000);
        let outcome = membership.update(&[claim], &clock);
        assert_eq!(outcome.refuted, Some(50_001));
    }

    #[test]
    fn test_stale_claims_about_local_are_ignored() {
        let (membership, clock) = membership();
        let local = membership.local_member();

        let claim = change(LOCAL, MemberStatus::Faulty, local.incarnation_number - 1);
        let outcome = membership.update(&[claim], &clock);
        assert!(outcome.refuted.is_none());
        assert!(outcome.applied.is_empty());
    }

    #[test]
    fn test_leave_only_accepted_from_self() {
        let (membership, clock) = membership();
        let local = membership.local_member();

        let foreign = change(LOCAL, MemberStatus::Leave, local.incarnation_number);
        let outcome = membership.update(&[foreign], &clock);
        assert!(outcome.refuted.is_some());
        assert_eq!(membership.local_member().status, MemberStatus::Alive);

        let local = membership.local_member();
        let own = Change::new(
            LOCAL,
            MemberStatus::Leave,
            local.incarnation_number,
            LOCAL,
            local.incarnation_number,
        );
        let outcome = membership.update(&[own], &clock);
        assert!(outcome.refuted.is_none());
        assert_eq!(membership.local_member().status, MemberStatus::Leave);

        let claim = change(LOCAL, MemberStatus::Suspect, local.incarnation_number + 1);
        let outcome = membership.update(&[claim], &clock);
        assert!(outcome.refuted.is_none(), "A leaving member does not refute");
    }

    #[test]
    fn test_random_pingable_members() {
        let (membership, clock) = membership();
        let changes = (1..=6)
            .map(|i| {
                let status = if i % 3 == 0 {
                    MemberStatus::Faulty
                } else {
                    MemberStatus::Alive
                };
                change(&format!("127.0.0.1:400{i}"), status, 1)
            })
            .collect::<Vec<_>>();
        membership.update(&changes, &clock);

        let pingable = membership.pingable_addresses();
        assert_eq!(pingable.len(), 4);
        assert!(!pingable.contains(&LOCAL.to_string()));

        let mut rng = SmallRng::seed_from_u64(1);
        let selected =
            membership.random_pingable_members(10, &["127.0.0.1:4001"], &mut rng);
        assert_eq!(selected.len(), 3);
        assert!(!selected.contains(&"127.0.0.1:4001".to_string()));

        let selected = membership.random_pingable_members(2, &[], &mut rng);
        assert_eq!(selected.len(), 2);

        assert_eq!(membership.faulty_addresses().len(), 2);
        assert_eq!(membership.status_counts(), [5, 0, 2, 0, 0]);
    }
}
