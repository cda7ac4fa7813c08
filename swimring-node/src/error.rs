use std::fmt::Debug;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::rpc::Status;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to join the cluster: {0}")]
    Join(#[from] JoinError),

    #[error("{0}")]
    Transport(#[from] TransportError),

    #[error("Failed to discover seed hosts: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Failed to initialised cluster extension: {0}")]
    Extension(anyhow::Error),
}

impl NodeError {
    /// A stable machine readable name for the error.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Config(e) => e.kind(),
            NodeError::Join(e) => e.kind(),
            NodeError::Transport(e) => e.kind(),
            NodeError::Discovery(e) => e.kind(),
            NodeError::Extension(_) => "extension",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("The {field} setting must be greater than zero.")]
    /// A size or duration setting was left at zero.
    Zero { field: &'static str },

    #[error("The app name must not be empty.")]
    EmptyApp,

    #[error("{address:?} is not a valid host:port address.")]
    InvalidAddress { address: String },

    #[error(
        "The ping timeout ({ping_timeout:?}) must be shorter than the ping-req timeout \
        ({ping_req_timeout:?})."
    )]
    /// The relay would never be able to answer before the sender gives up.
    PingTimeouts {
        ping_timeout: Duration,
        ping_req_timeout: Duration,
    },

    #[error("The join backoff minimum ({min:?}) is larger than the maximum ({max:?}).")]
    JoinBackoff { min: Duration, max: Duration },
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::Zero { .. } => "config-zero-value",
            ConfigError::EmptyApp => "config-empty-app",
            ConfigError::InvalidAddress { .. } => "config-invalid-address",
            ConfigError::PingTimeouts { .. } => "config-ping-timeouts",
            ConfigError::JoinBackoff { .. } => "config-join-backoff",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Request to {target} timed out after {timeout:?}.")]
    Timeout { target: String, timeout: Duration },

    #[error("Unable to reach {target}: {message}")]
    Connection { target: String, message: String },

    #[error("Remote rejected the request: {0}")]
    Remote(Status),

    #[error("Invalid message payload: {0}")]
    InvalidPayload(Status),
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout { .. } => "timeout",
            TransportError::Connection { .. } => "connection",
            TransportError::Remote(status) => status.code.as_str(),
            TransportError::InvalidPayload(_) => "bad-resp-body",
        }
    }

    /// Returns if the error originated from the transport rather than a
    /// decision made by the remote member.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::Connection { .. }
        )
    }

    /// The status returned by the remote member, if any.
    pub fn status(&self) -> Option<&Status> {
        match self {
            TransportError::Remote(status) => Some(status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("Failed to ping {target}: {source}")]
pub struct PingError {
    pub target: String,
    pub source: TransportError,
}

impl PingError {
    pub fn kind(&self) -> &'static str {
        "ping"
    }
}

#[derive(Debug, Error)]
pub enum PingReqError {
    #[error("No members are available to relay a ping-req to {target}.")]
    /// The target has been marked suspect without any indirect probe.
    NoMembers { target: String },

    #[error("Every relay failed to answer the ping-req for {target}: {errors:?}")]
    /// None of the relays produced an answer, the target's status is unchanged.
    Inconclusive {
        target: String,
        errors: Vec<TransportError>,
    },
}

impl PingReqError {
    pub fn kind(&self) -> &'static str {
        match self {
            PingReqError::NoMembers { .. } => "no-members",
            PingReqError::Inconclusive { .. } => "inconclusive",
        }
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("No seed hosts were provided to join.")]
    NoSeeds,

    #[error(
        "Join duration of {elapsed:?} exceeded the maximum of {max_duration:?}, \
        joined {joined} of {join_size} nodes."
    )]
    DurationExceeded {
        elapsed: Duration,
        max_duration: Duration,
        joined: usize,
        join_size: usize,
    },

    #[error(
        "Join attempts exceeded the maximum of {max_attempts}, joined {joined} of \
        {join_size} nodes."
    )]
    MaxAttemptsExceeded {
        max_attempts: usize,
        joined: usize,
        join_size: usize,
    },
}

impl JoinError {
    pub fn kind(&self) -> &'static str {
        match self {
            JoinError::NoSeeds => "join-no-seeds",
            JoinError::DurationExceeded { .. } => "join-duration-exceeded",
            JoinError::MaxAttemptsExceeded { .. } => "join-attempts-exceeded",
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to read hosts file: {0}")]
    IO(#[from] io::Error),

    #[error("Unable to parse hosts from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("Discovery failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        last: Box<DiscoveryError>,
    },
}

impl DiscoveryError {
    pub fn kind(&self) -> &'static str {
        match self {
            DiscoveryError::IO(_) => "discovery-io",
            DiscoveryError::Parse { .. } => "discovery-parse",
            DiscoveryError::Exhausted { .. } => "discovery-exhausted",
        }
    }
}
