use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::ProxyError;
use crate::messages::{OutgoingRequest, ProxyRequest, ProxyResponse, PROXY_ENDPOINT};
use crate::statistics::ProxyStatisticsInner;
use crate::ProxyInner;

#[derive(Debug, Clone, Default)]
/// Per request overrides of the proxy settings.
pub struct ProxyOptions {
    pub timeout: Option<Duration>,
    pub retry_schedule: Option<Vec<Duration>>,
}

impl ProxyOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_schedule(mut self, schedule: impl IntoIterator<Item = Duration>) -> Self {
        self.retry_schedule = Some(schedule.into_iter().collect());
        self
    }
}

/// Forwards the request to the member owning its keys.
pub(crate) async fn proxy_req(
    inner: &ProxyInner,
    request: OutgoingRequest,
    options: ProxyOptions,
) -> Result<ProxyResponse, ProxyError> {
    if request.keys.is_empty() {
        return Err(ProxyError::MissingKeys);
    }

    let _slot = inner.backpressure.try_acquire()?;
    inner.pending.track(forward(inner, request, options)).await
}

/// Handles the request locally if the key is owned by this node, otherwise
/// it is forwarded to the owner.
pub(crate) async fn handle_or_proxy(
    inner: &ProxyInner,
    key: &str,
    mut request: OutgoingRequest,
) -> Result<ProxyResponse, ProxyError> {
    if !request.keys.iter().any(|k| k == key) {
        request.keys.push(key.to_string());
    }

    let owner = inner.node.lookup(key).ok_or_else(|| ProxyError::NoDestination {
        key: key.to_string(),
    })?;
    if owner != inner.node.address() {
        return proxy_req(inner, request, ProxyOptions::default()).await;
    }

    let _slot = inner.backpressure.try_acquire()?;
    let req = request.into_proxy_request(inner.node.ring_checksum(), inner.node.address());
    inner.pending.track(inner.handle_locally(req)).await
}

async fn forward(
    inner: &ProxyInner,
    request: OutgoingRequest,
    options: ProxyOptions,
) -> Result<ProxyResponse, ProxyError> {
    let timeout = options.timeout.unwrap_or(inner.config.proxy_timeout);
    let schedule = options
        .retry_schedule
        .unwrap_or_else(|| inner.config.retry_schedule.clone());

    let self_addr = inner.node.address();
    let mut req = request.into_proxy_request(0, self_addr);
    let mut attempts = 0;

    loop {
        attempts += 1;

        // The ring may have changed since the last attempt.
        let destination = resolve(inner, &req.keys)?;
        req.checksum = inner.node.ring_checksum();

        if destination == self_addr {
            if attempts > 1 {
                ProxyStatisticsInner::incr(&inner.statistics.local_reroutes);
                info!(
                    self_addr = %self_addr,
                    endpoint = %req.endpoint,
                    attempt = attempts,
                    "Keys moved to the local node, handling request locally."
                );
            }
            return inner.handle_locally(req).await;
        }

        ProxyStatisticsInner::incr(&inner.statistics.requests_forwarded);
        let result = inner
            .node
            .client()
            .call::<ProxyRequest, ProxyResponse>(&destination, PROXY_ENDPOINT, &req, timeout)
            .await;

        let error = match result {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };

        let Some(delay) = schedule.get(attempts - 1).copied() else {
            warn!(
                self_addr = %self_addr,
                destination = %destination,
                endpoint = %req.endpoint,
                attempts = attempts,
                error = %error,
                "Giving up on proxied request."
            );
            return Err(ProxyError::MaxRetriesExceeded {
                attempts,
                last: error,
            });
        };

        debug!(
            self_addr = %self_addr,
            destination = %destination,
            attempt = attempts,
            delay = ?delay,
            error = %error,
            "Proxied request failed, retrying."
        );
        ProxyStatisticsInner::incr(&inner.statistics.retries);
        tokio::time::sleep(delay).await;
    }
}

/// Finds the single member owning every key.
fn resolve(inner: &ProxyInner, keys: &[String]) -> Result<String, ProxyError> {
    let mut destinations = BTreeSet::new();
    for key in keys {
        let owner = inner
            .node
            .lookup(key.as_str())
            .ok_or_else(|| ProxyError::NoDestination { key: key.clone() })?;
        destinations.insert(owner);
    }

    if destinations.len() > 1 {
        return Err(ProxyError::KeysDiverged {
            keys: keys.to_vec(),
            destinations: destinations.into_iter().collect(),
        });
    }

    destinations.into_iter().next().ok_or(ProxyError::MissingKeys)
}
