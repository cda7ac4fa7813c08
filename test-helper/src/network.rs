use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rkyv::AlignedVec;
use swimring_node::rpc::{ServiceRegistry, Transport};
use swimring_node::TransportError;

#[derive(Default)]
struct NetworkState {
    nodes: RwLock<HashMap<String, ServiceRegistry>>,
    /// Addresses which can neither send nor receive.
    isolated: RwLock<HashSet<String>>,
    /// (address, endpoint) pairs which do not receive.
    blocked_endpoints: RwLock<HashSet<(String, String)>>,
    /// (from, to) pairs which cannot reach each other.
    blocked_links: RwLock<HashSet<(String, String)>>,
}

#[derive(Clone, Default)]
/// An in-memory network routing messages between nodes of the same process.
///
/// Blocked traffic behaves like a black hole, the sender waits out its
/// timeout and gets a [TransportError::Timeout].
pub struct LocalNetwork {
    state: Arc<NetworkState>,
}

impl LocalNetwork {
    /// Creates a transport for a node which will be reachable at `address`.
    pub fn transport(&self, address: impl Into<String>) -> LocalTransport {
        LocalTransport {
            local: address.into(),
            network: self.clone(),
        }
    }

    /// Drops all traffic to and from the address.
    pub fn isolate(&self, address: &str) {
        self.state.isolated.write().insert(address.to_string());
    }

    /// Restores traffic to and from the address.
    pub fn reconnect(&self, address: &str) {
        self.state.isolated.write().remove(address);
    }

    /// Drops all traffic sent to an endpoint of the address.
    pub fn block_endpoint(&self, address: &str, endpoint: &str) {
        self.state
            .blocked_endpoints
            .write()
            .insert((address.to_string(), endpoint.to_string()));
    }

    pub fn unblock_endpoint(&self, address: &str, endpoint: &str) {
        self.state
            .blocked_endpoints
            .write()
            .remove(&(address.to_string(), endpoint.to_string()));
    }

    /// Drops traffic sent from `from` to `to`, the reverse direction is unaffected.
    pub fn block_link(&self, from: &str, to: &str) {
        self.state
            .blocked_links
            .write()
            .insert((from.to_string(), to.to_string()));
    }

    pub fn unblock_link(&self, from: &str, to: &str) {
        self.state
            .blocked_links
            .write()
            .remove(&(from.to_string(), to.to_string()));
    }

    /// Returns if a node is listening at the address.
    pub fn is_listening(&self, address: &str) -> bool {
        self.state.nodes.read().contains_key(address)
    }

    fn is_blocked(&self, from: &str, to: &str, endpoint: &str) -> bool {
        let isolated = self.state.isolated.read();
        if isolated.contains(from) || isolated.contains(to) {
            return true;
        }

        self.state
            .blocked_endpoints
            .read()
            .contains(&(to.to_string(), endpoint.to_string()))
            || self
                .state
                .blocked_links
                .read()
                .contains(&(from.to_string(), to.to_string()))
    }
}

/// The transport of a single node on a [LocalNetwork].
pub struct LocalTransport {
    local: String,
    network: LocalNetwork,
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(
        &self,
        target: &str,
        endpoint: &str,
        payload: AlignedVec,
        timeout: Duration,
    ) -> Result<AlignedVec, TransportError> {
        let timed_out = || TransportError::Timeout {
            target: target.to_string(),
            timeout,
        };

        if self.network.is_blocked(&self.local, target, endpoint) {
            tokio::time::sleep(timeout).await;
            return Err(timed_out());
        }

        let registry = self
            .network
            .state
            .nodes
            .read()
            .get(target)
            .cloned()
            .ok_or_else(|| TransportError::Connection {
                target: target.to_string(),
                message: "No node is listening at the address.".to_string(),
            })?;

        match tokio::time::timeout(timeout, registry.dispatch(endpoint, payload)).await {
            Err(_) => Err(timed_out()),
            Ok(Err(status)) => Err(TransportError::Remote(status)),
            Ok(Ok(resp)) => Ok(resp),
        }
    }

    async fn listen(
        &self,
        local: &str,
        registry: ServiceRegistry,
    ) -> Result<(), TransportError> {
        self.network
            .state
            .nodes
            .write()
            .insert(local.to_string(), registry);
        Ok(())
    }

    async fn close(&self) {
        self.network.state.nodes.write().remove(&self.local);
    }
}
