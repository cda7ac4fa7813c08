use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use rkyv::{Archive, Deserialize, Serialize};

/// Arbitrary metadata attached to a member.
pub type Labels = BTreeMap<String, String>;

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[archive(compare(PartialEq), check_bytes)]
#[archive_attr(derive(Debug, PartialEq, Eq))]
/// The liveness status of a member.
///
/// Statuses are ordered by precedence, for two claims with the same incarnation
/// number only the one further along the chain is applied.
pub enum MemberStatus {
    Alive,
    Suspect,
    Faulty,
    Leave,
    Tombstone,
}

impl MemberStatus {
    /// The precedence of the status when resolving two claims of the same incarnation.
    pub fn precedence(&self) -> u8 {
        match self {
            MemberStatus::Alive => 0,
            MemberStatus::Suspect => 1,
            MemberStatus::Faulty => 2,
            MemberStatus::Leave => 3,
            MemberStatus::Tombstone => 4,
        }
    }

    /// Members with this status are probed by the failure detector.
    pub fn is_pingable(&self) -> bool {
        matches!(self, MemberStatus::Alive | MemberStatus::Suspect)
    }

    /// Members with this status own a place on the hash ring.
    pub fn is_routable(&self) -> bool {
        self.is_pingable()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Alive => "alive",
            MemberStatus::Suspect => "suspect",
            MemberStatus::Faulty => "faulty",
            MemberStatus::Leave => "leave",
            MemberStatus::Tombstone => "tombstone",
        }
    }
}

impl Display for MemberStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
/// A single label entry as sent over the wire.
pub struct Label {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A member of the cluster as seen by the local node.
pub struct Member {
    /// The `host:port` address which identifies the member.
    pub address: String,
    pub status: MemberStatus,
    /// A logical clock only ever incremented by the member itself.
    pub incarnation_number: i64,
    pub labels: Labels,
}

impl Member {
    pub fn new(address: impl Into<String>, status: MemberStatus, incarnation_number: i64) -> Self {
        Self {
            address: address.into(),
            status,
            incarnation_number,
            labels: Labels::new(),
        }
    }

    /// Returns if a claim of `status` at `incarnation_number` overrides this member's
    /// current state.
    ///
    /// A higher incarnation always wins, an equal incarnation only wins with a
    /// higher status precedence.
    pub fn is_superseded_by(&self, status: MemberStatus, incarnation_number: i64) -> bool {
        incarnation_number > self.incarnation_number
            || (incarnation_number == self.incarnation_number
                && status.precedence() > self.status.precedence())
    }

    /// Produces a change describing the member's current state.
    pub fn to_change(&self, source: &str, source_incarnation_number: i64) -> Change {
        Change {
            address: self.address.clone(),
            status: self.status,
            incarnation_number: self.incarnation_number,
            source: source.to_string(),
            source_incarnation_number,
            labels: labels_to_wire(&self.labels),
        }
    }

    /// The representation of the member used for the membership checksum.
    pub(crate) fn checksum_repr(&self) -> String {
        let mut repr = format!(
            "{}{}{}",
            self.address,
            self.status.as_str(),
            self.incarnation_number
        );
        for (key, value) in self.labels.iter() {
            repr.push('#');
            repr.push_str(key);
            repr.push('=');
            repr.push_str(value);
        }
        repr
    }
}

impl From<&Change> for Member {
    fn from(change: &Change) -> Self {
        Self {
            address: change.address.clone(),
            status: change.status,
            incarnation_number: change.incarnation_number,
            labels: labels_from_wire(&change.labels),
        }
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
/// A single membership fact which is disseminated across the cluster.
pub struct Change {
    /// The member the change is about.
    pub address: String,
    pub status: MemberStatus,
    pub incarnation_number: i64,
    /// The node which first produced the change.
    pub source: String,
    /// The incarnation number of `source` when the change was produced.
    pub source_incarnation_number: i64,
    pub labels: Vec<Label>,
}

impl Change {
    pub fn new(
        address: impl Into<String>,
        status: MemberStatus,
        incarnation_number: i64,
        source: impl Into<String>,
        source_incarnation_number: i64,
    ) -> Self {
        Self {
            address: address.into(),
            status,
            incarnation_number,
            source: source.into(),
            source_incarnation_number,
            labels: Vec::new(),
        }
    }

    /// Returns if this change should replace `other` when both describe the same member.
    pub fn supersedes(&self, other: &Change) -> bool {
        self.incarnation_number > other.incarnation_number
            || (self.incarnation_number == other.incarnation_number
                && self.status.precedence() > other.status.precedence())
    }
}

/// Merges several sets of changes into one, keeping the strongest claim per address.
///
/// The result is ordered by address.
pub fn merge_changes(sets: impl IntoIterator<Item = Vec<Change>>) -> Vec<Change> {
    let mut merged = BTreeMap::<String, Change>::new();

    for change in sets.into_iter().flatten() {
        match merged.get(&change.address) {
            Some(existing) if !change.supersedes(existing) => {},
            _ => {
                merged.insert(change.address.clone(), change);
            },
        }
    }

    merged.into_values().collect()
}

pub(crate) fn labels_to_wire(labels: &Labels) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

pub(crate) fn labels_from_wire(labels: &[Label]) -> Labels {
    labels
        .iter()
        .map(|label| (label.key.clone(), label.value.clone()))
        .collect()
}
