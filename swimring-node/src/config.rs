use std::time::Duration;

use crate::error::ConfigError;
use crate::member::Labels;

pub static DEFAULT_APP: &str = "swimring";

#[derive(Debug, Clone)]
/// Tuning of the membership protocol.
///
/// Every member of a cluster should run with the same configuration,
/// with the exception of `labels` and `blacklist`.
pub struct SwimConfig {
    /// The name of the application, nodes of different apps refuse to join each other.
    pub app: String,

    /// How long to wait for a direct ping to be acknowledged.
    pub ping_timeout: Duration,
    /// How long to wait for a relay to answer a ping-req.
    ///
    /// This must be longer than `ping_timeout` as the relay pings the target itself.
    pub ping_req_timeout: Duration,
    /// The number of relays used when a direct ping fails.
    pub ping_req_size: usize,
    /// The lower bound of the delay between two protocol rounds.
    pub min_protocol_period: Duration,

    /// How long a member stays suspect before being declared faulty.
    pub suspect_timeout: Duration,
    /// How long a member stays faulty before being tombstoned.
    pub faulty_timeout: Duration,
    /// How long a tombstone is kept before the member is evicted.
    pub tombstone_timeout: Duration,

    /// Scales how many times a change is piggybacked before being dropped.
    pub piggyback_factor: u32,
    /// The maximum number of changes attached to a single message.
    pub max_changes_per_message: usize,

    /// The number of nodes which must accept our join.
    pub join_size: usize,
    /// How many more join requests than needed are sent per group.
    pub parallelism_factor: usize,
    pub join_timeout: Duration,
    pub max_join_duration: Duration,
    pub max_join_attempts: usize,
    pub join_backoff_min: Duration,
    pub join_backoff_max: Duration,

    /// The delay between two partition healing passes.
    pub heal_period: Duration,
    /// The maximum number of faulty members contacted per healing pass.
    pub heal_max_targets: usize,

    /// Host patterns which are refused when they attempt to join.
    ///
    /// Patterns match against the full `host:port` address and may
    /// contain `*` wildcards, e.g. `10.0.0.*:*`.
    pub blacklist: Vec<String>,
    /// Labels of the local member.
    pub labels: Labels,
    /// Seeds the random number generator, useful for reproducible tests.
    pub rng_seed: Option<u64>,
}

impl Default for SwimConfig {
    fn default() -> Self {
        Self {
            app: DEFAULT_APP.to_string(),
            ping_timeout: Duration::from_millis(1_500),
            ping_req_timeout: Duration::from_secs(5),
            ping_req_size: 3,
            min_protocol_period: Duration::from_millis(200),
            suspect_timeout: Duration::from_secs(5),
            faulty_timeout: Duration::from_secs(24 * 60 * 60),
            tombstone_timeout: Duration::from_secs(60),
            piggyback_factor: 15,
            max_changes_per_message: 64,
            join_size: 3,
            parallelism_factor: 2,
            join_timeout: Duration::from_secs(1),
            max_join_duration: Duration::from_secs(120),
            max_join_attempts: 50,
            join_backoff_min: Duration::from_millis(100),
            join_backoff_max: Duration::from_secs(5),
            heal_period: Duration::from_secs(30),
            heal_max_targets: 10,
            blacklist: Vec::new(),
            labels: Labels::new(),
            rng_seed: None,
        }
    }
}

impl SwimConfig {
    /// Set the application name.
    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.app = app.into();
        self
    }

    /// Set the direct and indirect ping timeouts.
    pub fn with_ping_timeouts(mut self, ping: Duration, ping_req: Duration) -> Self {
        self.ping_timeout = ping;
        self.ping_req_timeout = ping_req;
        self
    }

    pub fn with_ping_req_size(mut self, size: usize) -> Self {
        self.ping_req_size = size;
        self
    }

    pub fn with_min_protocol_period(mut self, period: Duration) -> Self {
        self.min_protocol_period = period;
        self
    }

    /// Set the suspect, faulty and tombstone timeouts.
    pub fn with_state_timeouts(
        mut self,
        suspect: Duration,
        faulty: Duration,
        tombstone: Duration,
    ) -> Self {
        self.suspect_timeout = suspect;
        self.faulty_timeout = faulty;
        self.tombstone_timeout = tombstone;
        self
    }

    pub fn with_piggyback_factor(mut self, factor: u32) -> Self {
        self.piggyback_factor = factor;
        self
    }

    pub fn with_join_size(mut self, size: usize) -> Self {
        self.join_size = size;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set the bounds of the join process.
    pub fn with_join_limits(mut self, max_duration: Duration, max_attempts: usize) -> Self {
        self.max_join_duration = max_duration;
        self.max_join_attempts = max_attempts;
        self
    }

    pub fn with_join_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.join_backoff_min = min;
        self.join_backoff_max = max;
        self
    }

    pub fn with_heal_period(mut self, period: Duration) -> Self {
        self.heal_period = period;
        self
    }

    /// Adds a host pattern to refuse joins from.
    pub fn with_blacklisted(mut self, pattern: impl Into<String>) -> Self {
        self.blacklist.push(pattern.into());
        self
    }

    /// Adds a label to the local member.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Checks the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.trim().is_empty() {
            return Err(ConfigError::EmptyApp);
        }

        let durations = [
            ("ping_timeout", self.ping_timeout),
            ("ping_req_timeout", self.ping_req_timeout),
            ("min_protocol_period", self.min_protocol_period),
            ("suspect_timeout", self.suspect_timeout),
            ("faulty_timeout", self.faulty_timeout),
            ("tombstone_timeout", self.tombstone_timeout),
            ("join_timeout", self.join_timeout),
            ("max_join_duration", self.max_join_duration),
            ("join_backoff_min", self.join_backoff_min),
            ("heal_period", self.heal_period),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Zero { field });
            }
        }

        let sizes = [
            ("ping_req_size", self.ping_req_size),
            ("piggyback_factor", self.piggyback_factor as usize),
            ("max_changes_per_message", self.max_changes_per_message),
            ("join_size", self.join_size),
            ("parallelism_factor", self.parallelism_factor),
            ("max_join_attempts", self.max_join_attempts),
            ("heal_max_targets", self.heal_max_targets),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        if self.ping_timeout >= self.ping_req_timeout {
            return Err(ConfigError::PingTimeouts {
                ping_timeout: self.ping_timeout,
                ping_req_timeout: self.ping_req_timeout,
            });
        }

        if self.join_backoff_min > self.join_backoff_max {
            return Err(ConfigError::JoinBackoff {
                min: self.join_backoff_min,
                max: self.join_backoff_max,
            });
        }

        Ok(())
    }
}

/// Checks the address is in the `host:port` format.
pub fn validate_address(address: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidAddress {
        address: address.to_string(),
    };

    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;

    Ok(())
}

/// The host part of a `host:port` address.
pub(crate) fn host_of(address: &str) -> &str {
    address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        SwimConfig::default()
            .validate()
            .expect("Default config should be valid");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = SwimConfig::default().with_app("  ").validate().unwrap_err();
        assert_eq!(err.kind(), "config-empty-app");

        let err = SwimConfig::default()
            .with_join_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { field: "join_size" }));

        let err = SwimConfig::default()
            .with_ping_timeouts(Duration::from_secs(5), Duration::from_secs(1))
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), "config-ping-timeouts");

        let err = SwimConfig::default()
            .with_join_backoff(Duration::from_secs(10), Duration::from_secs(1))
            .validate()
            .unwrap_err();
        assert_eq!(err.kind(), "config-join-backoff");
    }

    #[test]
    fn test_validate_address() {
        assert!(validate_address("127.0.0.1:3000").is_ok());
        assert!(validate_address("node-1.internal:80").is_ok());
        assert!(validate_address("127.0.0.1").is_err());
        assert!(validate_address(":3000").is_err());
        assert!(validate_address("127.0.0.1:abc").is_err());
        assert!(validate_address("127.0.0.1:99999").is_err());
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("127.0.0.1:3000"), "127.0.0.1");
        assert_eq!(host_of("localhost"), "localhost");
    }
}
