use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

use rkyv::{Archive, Deserialize, Serialize};

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Clone, PartialEq, Eq)]
#[archive(compare(PartialEq), check_bytes)]
#[archive_attr(derive(PartialEq, Eq, Debug))]
/// Status information around the cause of a protocol request failing.
///
/// This includes a typed error code and a display message.
pub struct Status {
    /// The error code of the request.
    pub code: ErrorCode,
    /// The display message for the error.
    pub message: String,
}

impl Status {
    pub fn new(code: ErrorCode, msg: impl Display) -> Self {
        Self {
            code,
            message: msg.to_string(),
        }
    }

    /// The node is running but no handler is registered for the endpoint.
    pub fn unavailable(msg: impl Display) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, msg)
    }

    /// An internal error occurred while processing the message.
    pub fn internal(msg: impl Display) -> Self {
        Self::new(ErrorCode::InternalError, msg)
    }

    /// The provided message data is invalid or unable to be deserialized
    /// by the node processing it.
    pub fn invalid() -> Self {
        Self::new(
            ErrorCode::InvalidPayload,
            "Invalid message payload was provided to be deserialized.",
        )
    }

    /// The operation took too long to be completed and was aborted.
    pub fn timeout() -> Self {
        Self::new(
            ErrorCode::Timeout,
            "The operation took to long to be completed.",
        )
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl Debug for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Status")
            .field("code", &self.code)
            .field("message", &self.message)
            .finish()
    }
}

impl Error for Status {}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Copy, Clone, PartialEq, Eq, Debug)]
#[archive(compare(PartialEq), check_bytes)]
#[archive_attr(derive(Debug, PartialEq, Eq))]
/// A typed error code describing why a request was rejected.
pub enum ErrorCode {
    /// No handler is registered for the requested endpoint.
    ServiceUnavailable,
    /// An internal error occurred while processing the message.
    InternalError,
    /// The provided message data could not be deserialized.
    InvalidPayload,
    /// The operation took too long to be completed and was aborted.
    Timeout,
    /// A node attempted to join itself.
    JoinSelf,
    /// The joining node belongs to a different application.
    JoinAppMismatch,
    /// The joining node matches one of the blacklisted host patterns.
    JoinBlacklisted,
    /// The joining node did not provide a valid `host:port` address.
    JoinInvalidSource,
    /// The node is currently refusing all join requests.
    JoinDenied,
    /// The relay could not reach the ping-req target.
    BadPingStatus,
    /// The ring checksum of a proxied request does not match the local ring.
    InvalidChecksum,
    /// The proxied request's keys are not owned by the receiving node.
    KeysNotOwned,
    /// The node has too many requests in flight.
    TooManyRequests,
    /// The node's event loop is lagging behind.
    EventLoopLagged,
    /// The request sat in flight for longer than the wedge timeout.
    WedgedRequest,
    /// The node is shutting down.
    Destroyed,
}

impl ErrorCode {
    /// A stable machine readable name for the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ServiceUnavailable => "service-unavailable",
            ErrorCode::InternalError => "internal-error",
            ErrorCode::InvalidPayload => "bad-resp-body",
            ErrorCode::Timeout => "timeout",
            ErrorCode::JoinSelf => "join-self",
            ErrorCode::JoinAppMismatch => "join-app-mismatch",
            ErrorCode::JoinBlacklisted => "join-blacklisted",
            ErrorCode::JoinInvalidSource => "join-invalid-source",
            ErrorCode::JoinDenied => "join-denied",
            ErrorCode::BadPingStatus => "bad-ping-status",
            ErrorCode::InvalidChecksum => "invalid-checksum",
            ErrorCode::KeysNotOwned => "keys-not-owned",
            ErrorCode::TooManyRequests => "too-many-requests",
            ErrorCode::EventLoopLagged => "event-loop-lagged",
            ErrorCode::WedgedRequest => "wedged-request",
            ErrorCode::Destroyed => "destroyed",
        }
    }
}
