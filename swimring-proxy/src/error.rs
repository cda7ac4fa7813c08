use std::time::Duration;

use swimring_node::rpc::{ErrorCode, Status};
use swimring_node::{ConfigError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid proxy configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("A proxied request must carry at least one key.")]
    MissingKeys,

    #[error("The hash ring is empty, no member owns {key:?}.")]
    NoDestination { key: String },

    #[error("The request keys are owned by different members: {destinations:?}")]
    /// The keys of a single request resolved to more than one member.
    KeysDiverged {
        keys: Vec<String>,
        destinations: Vec<String>,
    },

    #[error("Too many requests in flight ({observed} >= {limit}).")]
    TooManyRequests { limit: usize, observed: usize },

    #[error("The event loop is lagging ({observed:?} > {limit:?}).")]
    EventLoopLagged { limit: Duration, observed: Duration },

    #[error("Failed to forward the request after {attempts} attempts: {last}")]
    /// Every attempt of the retry schedule failed.
    MaxRetriesExceeded {
        attempts: usize,
        last: TransportError,
    },

    #[error("The request was in flight for longer than {timeout:?} and was aborted.")]
    WedgedRequest { timeout: Duration },

    #[error("The proxy has been destroyed.")]
    Destroyed,

    #[error("The request handler failed: {0}")]
    /// The local handler rejected the request.
    Handler(Status),
}

impl ProxyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Config(e) => e.kind(),
            ProxyError::MissingKeys => "missing-keys",
            ProxyError::NoDestination { .. } => "no-destination",
            ProxyError::KeysDiverged { .. } => "keys-diverged",
            ProxyError::TooManyRequests { .. } => "too-many-requests",
            ProxyError::EventLoopLagged { .. } => "event-loop-lagged",
            ProxyError::MaxRetriesExceeded { .. } => "max-retries-exceeded",
            ProxyError::WedgedRequest { .. } => "wedged-request",
            ProxyError::Destroyed => "destroyed",
            ProxyError::Handler(status) => status.code.as_str(),
        }
    }

    /// The status this error is reported as to a remote member.
    pub fn to_status(&self) -> Status {
        let code = match self {
            ProxyError::TooManyRequests { .. } => ErrorCode::TooManyRequests,
            ProxyError::EventLoopLagged { .. } => ErrorCode::EventLoopLagged,
            ProxyError::WedgedRequest { .. } => ErrorCode::WedgedRequest,
            ProxyError::Destroyed => ErrorCode::Destroyed,
            ProxyError::Handler(status) => return status.clone(),
            _ => ErrorCode::InternalError,
        };

        Status::new(code, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status() {
        let err = ProxyError::TooManyRequests {
            limit: 10,
            observed: 10,
        };
        assert_eq!(err.kind(), "too-many-requests");
        assert_eq!(err.to_status().code, ErrorCode::TooManyRequests);

        let status = Status::new(ErrorCode::KeysNotOwned, "nope");
        let err = ProxyError::Handler(status.clone());
        assert_eq!(err.kind(), "keys-not-owned");
        assert_eq!(err.to_status(), status);

        assert_eq!(ProxyError::MissingKeys.to_status().code, ErrorCode::InternalError);
    }
}
