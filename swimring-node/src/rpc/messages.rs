use rkyv::{Archive, Deserialize, Serialize};

use crate::member::Change;

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
/// A direct probe of a member, carrying piggybacked changes.
pub struct PingRequest {
    /// The sender's membership checksum.
    pub checksum: u32,
    pub changes: Vec<Change>,
    pub source: String,
    pub source_incarnation_number: i64,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct PingResponse {
    pub changes: Vec<Change>,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
/// Asks a relay to ping `target` on the sender's behalf.
pub struct PingReqRequest {
    pub checksum: u32,
    pub changes: Vec<Change>,
    pub source: String,
    pub source_incarnation_number: i64,
    pub target: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct PingReqResponse {
    pub changes: Vec<Change>,
    /// If the relay managed to reach the target.
    pub ping_status: bool,
    pub target: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub struct JoinRequest {
    /// The application the joining node belongs to.
    pub app: String,
    pub source: String,
    pub incarnation_number: i64,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
/// The coordinator's full view of the cluster.
pub struct JoinResponse {
    pub app: String,
    pub coordinator: String,
    pub membership: Vec<Change>,
    pub membership_checksum: u32,
}
