use std::time::Duration;

use swimring_node::ConfigError;

#[derive(Debug, Clone)]
/// Settings of the request proxy.
pub struct ProxyConfig {
    /// The number of requests which may be in flight at once, counting both
    /// requests received from other members and requests sent by this node.
    pub max_inflight_requests: usize,
    /// The timeout of a single forwarding attempt.
    pub proxy_timeout: Duration,
    /// The delays before each retry of a failed forward.
    ///
    /// A request is attempted at most `retry_schedule.len() + 1` times.
    pub retry_schedule: Vec<Duration>,
    /// Requests in flight for longer than this are aborted.
    pub wedge_timeout: Duration,
    /// How often pending requests are checked against the wedge timeout.
    pub wedge_scan_interval: Duration,
    /// The largest event loop lag at which new requests are still accepted.
    pub max_event_loop_lag: Duration,
    /// How often the event loop lag is sampled.
    pub lag_sample_interval: Duration,
    /// Reject requests whose ring checksum differs from the local ring.
    pub enforce_consistency: bool,
    /// Reject requests for keys the local node does not own.
    pub enforce_key_ownership: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_inflight_requests: 10_000,
            proxy_timeout: Duration::from_secs(30),
            retry_schedule: vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_millis(3_500),
            ],
            wedge_timeout: Duration::from_secs(60),
            wedge_scan_interval: Duration::from_secs(1),
            max_event_loop_lag: Duration::from_millis(150),
            lag_sample_interval: Duration::from_millis(500),
            enforce_consistency: true,
            enforce_key_ownership: true,
        }
    }
}

impl ProxyConfig {
    pub fn with_max_inflight_requests(mut self, max: usize) -> Self {
        self.max_inflight_requests = max;
        self
    }

    pub fn with_proxy_timeout(mut self, timeout: Duration) -> Self {
        self.proxy_timeout = timeout;
        self
    }

    /// Set the delays before each retry, an empty schedule disables retries.
    pub fn with_retry_schedule(mut self, schedule: impl IntoIterator<Item = Duration>) -> Self {
        self.retry_schedule = schedule.into_iter().collect();
        self
    }

    pub fn with_wedge_timeout(mut self, timeout: Duration) -> Self {
        self.wedge_timeout = timeout;
        self
    }

    pub fn with_max_event_loop_lag(mut self, lag: Duration) -> Self {
        self.max_event_loop_lag = lag;
        self
    }

    pub fn with_enforce_consistency(mut self, enforce: bool) -> Self {
        self.enforce_consistency = enforce;
        self
    }

    pub fn with_enforce_key_ownership(mut self, enforce: bool) -> Self {
        self.enforce_key_ownership = enforce;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_inflight_requests == 0 {
            return Err(ConfigError::Zero {
                field: "max_inflight_requests",
            });
        }

        let durations = [
            ("proxy_timeout", self.proxy_timeout),
            ("wedge_timeout", self.wedge_timeout),
            ("wedge_scan_interval", self.wedge_scan_interval),
            ("max_event_loop_lag", self.max_event_loop_lag),
            ("lag_sample_interval", self.lag_sample_interval),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Zero { field });
            }
        }

        Ok(())
    }
}
