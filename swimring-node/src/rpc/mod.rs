//! The protocol messages exchanged between members and the narrow transport
//! interface used to move them around.

pub mod messages;
mod registry;
pub(crate) mod services;
mod status;
mod transport;

use rkyv::de::deserializers::SharedDeserializeMap;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Serialize};

pub use self::registry::{MessageHandler, ServiceRegistry};
pub use self::status::{ErrorCode, Status};
pub use self::transport::{ProtocolClient, Transport};

/// The amount of stack scratch space used when serializing messages.
pub const SCRATCH_SPACE: usize = 4096;

/// The endpoint used for direct pings.
pub const PING_ENDPOINT: &str = "/protocol/ping";
/// The endpoint used for indirect pings through a relay.
pub const PING_REQ_ENDPOINT: &str = "/protocol/ping-req";
/// The endpoint used for joining the cluster and healing partitions.
pub const JOIN_ENDPOINT: &str = "/protocol/join";

/// Serializes a message into an aligned buffer ready to be sent.
pub fn encode<T>(value: &T) -> Result<AlignedVec, Status>
where
    T: Serialize<AllocSerializer<SCRATCH_SPACE>>,
{
    rkyv::to_bytes::<_, SCRATCH_SPACE>(value)
        .map_err(|e| Status::internal(format!("Failed to serialize message: {e}")))
}

/// Validates and deserializes a message from the given buffer.
pub fn decode<T>(bytes: &[u8]) -> Result<T, Status>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
        + Deserialize<T, SharedDeserializeMap>,
{
    rkyv::from_bytes::<T>(bytes).map_err(|_| Status::invalid())
}
