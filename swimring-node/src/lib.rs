//! # Swimring Node
//!
//! The membership layer of swimring: a SWIM style gossip protocol tracking
//! which nodes of a cluster are alive, disseminating membership changes by
//! piggybacking them onto protocol messages, and keeping a rendezvous hash
//! ring in sync with the alive members.
//!
//! A node is created with the [SwimNodeBuilder] over any [Transport]
//! implementation, once connected it joins the cluster through its seeds
//! and starts the failure detector and partition healer.
//!
//! ```ignore
//! let node = SwimNodeBuilder::new("127.0.0.1:3000", SwimConfig::default())
//!     .with_seeds(["127.0.0.1:3000", "127.0.0.1:3001"])
//!     .connect(transport)
//!     .await?;
//!
//! let owner = node.lookup("my-key");
//! ```

#[macro_use]
extern crate tracing;

mod clock;
mod config;
mod discovery;
mod dissemination;
mod error;
mod extension;
mod gossip;
mod healer;
mod join;
mod member;
mod membership;
pub mod rpc;
mod state;
mod statistics;
mod timers;
mod transitions;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast;

pub use self::clock::IncarnationClock;
pub use self::config::{validate_address, SwimConfig, DEFAULT_APP};
pub use self::discovery::{DiscoverProvider, FileHosts, RetryingProvider, StaticHosts};
pub use self::dissemination::{max_piggyback_count, Dissemination, DisseminationEvent, Issued};
pub use self::error::{
    ConfigError,
    DiscoveryError,
    JoinError,
    NodeError,
    PingError,
    PingReqError,
    TransportError,
};
pub use self::extension::ClusterExtension;
pub use self::gossip::{Gossip, PingReqOutcome, TickOutcome};
pub use self::healer::PartitionHealer;
pub use self::join::JoinOutcome;
pub use self::member::{merge_changes, Change, Label, Labels, Member, MemberStatus};
pub use self::membership::{Membership, MembershipEvent, UpdateOutcome};
use self::rpc::{MessageHandler, ProtocolClient, ServiceRegistry, Transport};
pub use self::statistics::ClusterStatistics;
pub use self::timers::{TimerHandle, Timers, TokioTimers};
use crate::state::SwimCore;
pub use swimring_hashring::{HashRing, RingEvent};

/// Build a swimring node using provided settings.
pub struct SwimNodeBuilder {
    address: String,
    config: SwimConfig,
    discovery: Option<Arc<dyn DiscoverProvider>>,
    timers: Arc<dyn Timers>,
    clock: IncarnationClock,
    autostart: bool,
}

impl SwimNodeBuilder {
    /// Create a new node builder.
    ///
    /// The address is the `host:port` other members use to reach this node
    /// and **must be unique** within the cluster.
    pub fn new(address: impl Into<String>, config: SwimConfig) -> Self {
        Self {
            address: address.into(),
            config,
            discovery: None,
            timers: Arc::new(TokioTimers),
            clock: IncarnationClock::system(),
            autostart: true,
        }
    }

    /// Set a static list of seed hosts to join through.
    ///
    /// Including the node's own address is allowed, a node whose only seed is
    /// itself bootstraps a new cluster.
    pub fn with_seeds(self, seeds: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.with_discover_provider(StaticHosts::new(seeds))
    }

    /// Set the provider used to discover the seed hosts.
    pub fn with_discover_provider(mut self, provider: impl DiscoverProvider) -> Self {
        self.discovery = Some(Arc::new(provider));
        self
    }

    /// Set the timers used for the member state transitions.
    pub fn with_timers(mut self, timers: Arc<dyn Timers>) -> Self {
        self.timers = timers;
        self
    }

    /// Set the clock producing the local member's incarnation numbers.
    pub fn with_clock(mut self, clock: IncarnationClock) -> Self {
        self.clock = clock;
        self
    }

    /// If the gossip protocol and partition healer are started once connected.
    ///
    /// Defaults to `true`, disabling this allows driving the protocol by hand
    /// with [SwimNode::tick] and [SwimNode::heal].
    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// Creates the node without listening or joining.
    pub fn build(self, transport: impl Transport) -> Result<SwimNode, NodeError> {
        self.config.validate()?;
        validate_address(&self.address)?;

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let core = SwimCore::new(
            self.address,
            self.config,
            transport.clone(),
            self.timers,
            self.clock,
        );
        rpc::services::register_protocol(&core.registry, &core);

        Ok(SwimNode {
            gossip: Arc::new(Gossip::new(core.clone())),
            healer: Arc::new(PartitionHealer::new(core.clone())),
            handle: SwimHandle { core },
            discovery: self.discovery,
            autostart: self.autostart,
            transport,
        })
    }

    /// Starts the node, joining the cluster through the seed hosts.
    ///
    /// The join must complete before the node is returned, if it fails the
    /// transport is closed again.
    pub async fn connect(self, transport: impl Transport) -> Result<SwimNode, NodeError> {
        let node = self.build(transport)?;

        node.transport
            .listen(node.address(), node.handle.core.registry.clone())
            .await?;

        if let Err(e) = node.bootstrap().await {
            error!(
                self_addr = %node.address(),
                error = %e,
                kind = e.kind(),
                "Failed to bootstrap node."
            );
            node.transport.close().await;
            return Err(e);
        }

        if node.autostart {
            node.gossip.start();
            node.healer.start();
        }

        info!(
            self_addr = %node.address(),
            app = %node.handle.core.config.app,
            num_members = node.handle.core.membership.len(),
            "Swimring node connected."
        );

        Ok(node)
    }
}

/// A running member of the cluster.
pub struct SwimNode {
    handle: SwimHandle,
    gossip: Arc<Gossip>,
    healer: Arc<PartitionHealer>,
    discovery: Option<Arc<dyn DiscoverProvider>>,
    autostart: bool,
    transport: Arc<dyn Transport>,
}

impl SwimNode {
    #[inline]
    /// Creates a handle to the node providing the core functionality of the node.
    pub fn handle(&self) -> SwimHandle {
        self.handle.clone()
    }

    #[inline]
    /// The address of the local member.
    pub fn address(&self) -> &str {
        self.handle.address()
    }

    #[inline]
    /// Return the local member.
    pub fn me(&self) -> Member {
        self.handle.me()
    }

    #[inline]
    /// A snapshot of every member the node knows of.
    pub fn members(&self) -> Vec<Member> {
        self.handle.members()
    }

    #[inline]
    pub fn find_member(&self, address: &str) -> Option<Member> {
        self.handle.find_member(address)
    }

    #[inline]
    /// The membership checksum.
    pub fn checksum(&self) -> u32 {
        self.handle.checksum()
    }

    #[inline]
    /// Finds the member owning the key.
    pub fn lookup(&self, key: impl AsRef<[u8]>) -> Option<String> {
        self.handle.lookup(key)
    }

    #[inline]
    /// Finds the `n` preferred members for the key.
    pub fn lookup_n(&self, key: impl AsRef<[u8]>, n: usize) -> Vec<String> {
        self.handle.lookup_n(key, n)
    }

    #[inline]
    pub fn ring_checksum(&self) -> u32 {
        self.handle.ring_checksum()
    }

    #[inline]
    /// Gets the live cluster statistics.
    pub fn statistics(&self) -> ClusterStatistics {
        self.handle.statistics()
    }

    #[inline]
    /// The gossip protocol driver.
    pub fn gossip(&self) -> &Arc<Gossip> {
        &self.gossip
    }

    #[inline]
    pub fn healer(&self) -> &Arc<PartitionHealer> {
        &self.healer
    }

    #[inline]
    /// Runs a single protocol round, see [Gossip::tick].
    pub async fn tick(&self) -> TickOutcome {
        self.gossip.tick().await
    }

    /// Pings the target directly.
    pub async fn ping(&self, target: &str) -> Result<(), PingError> {
        gossip::ping::send_ping(&self.handle.core, target, Vec::new()).await
    }

    /// Probes the target indirectly through random relays.
    pub async fn ping_req(&self, target: &str) -> Result<PingReqOutcome, PingReqError> {
        gossip::ping_req::send_ping_req(&self.handle.core, target).await
    }

    #[inline]
    /// Runs a single partition healing pass, see [PartitionHealer::heal].
    pub async fn heal(&self) -> Vec<String> {
        self.healer.heal().await
    }

    /// Joins the cluster through the hosts of the discovery provider.
    pub async fn bootstrap(&self) -> Result<JoinOutcome, NodeError> {
        let seeds = match self.discovery.as_ref() {
            Some(provider) => provider.discover().await?,
            None => Vec::new(),
        };

        let outcome = join::join_cluster(&self.handle.core, &seeds).await?;
        Ok(outcome)
    }

    /// Replaces the labels of the local member, reincarnating it so the new
    /// labels are disseminated.
    pub fn set_labels(&self, labels: Labels) {
        let core = &self.handle.core;
        let me = core.membership.local_member();

        let mut change = me.to_change(&core.address, me.incarnation_number);
        change.incarnation_number = core.clock.next(me.incarnation_number);
        change.source_incarnation_number = change.incarnation_number;
        change.labels = member::labels_to_wire(&labels);

        core.apply_changes(&[change]);
    }

    /// Gracefully leaves the cluster.
    ///
    /// The node marks itself as leaving and tells a few random members
    /// directly before stopping the protocol, the remaining members learn
    /// of the leave through gossip.
    pub async fn leave(&self) {
        let core = &self.handle.core;
        core.make_leave(&core.address, core.local_incarnation());

        let targets = core.with_rng(|rng| {
            core.membership
                .random_pingable_members(core.config.ping_req_size, &[], rng)
        });
        let results = join_all(
            targets
                .iter()
                .map(|target| gossip::ping::send_ping(core, target, Vec::new())),
        )
        .await;
        let notified = results.iter().filter(|r| r.is_ok()).count();

        self.gossip.stop();
        self.healer.stop();

        info!(
            self_addr = %core.address,
            notified = notified,
            "Left the cluster."
        );
    }

    /// Rejects every incoming join request until [SwimNode::allow_joins] is called.
    pub fn deny_joins(&self) {
        self.handle.core.set_deny_joins(true);
    }

    pub fn allow_joins(&self) {
        self.handle.core.set_deny_joins(false);
    }

    /// Adds a handler for a custom endpoint to the node's transport.
    pub fn add_handler(&self, endpoint: impl Into<String>, handler: impl MessageHandler) {
        self.handle.add_handler(endpoint, handler)
    }

    /// Extends the node with additional functionality.
    pub async fn add_extension<E>(&self, extension: E) -> Result<E::Output, E::Error>
    where
        E: ClusterExtension,
    {
        extension.init_extension(self).await
    }

    /// Convenience method for testing that waits for the predicate to hold
    /// true for the cluster's members.
    pub async fn wait_for_members<F>(
        &self,
        mut predicate: F,
        timeout_after: Duration,
    ) -> Result<(), anyhow::Error>
    where
        F: FnMut(&[Member]) -> bool,
    {
        let core = &self.handle.core;
        let mut changes = core.watch_version();

        let reached = tokio::time::timeout(timeout_after, async {
            loop {
                if predicate(&core.membership.snapshot()) {
                    return true;
                }

                if changes.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await?;

        if !reached {
            anyhow::bail!("Membership watcher closed before the predicate held.");
        }

        Ok(())
    }

    /// Shuts down the node, stopping the protocol and any pending timers.
    pub async fn shutdown(self) {
        info!(self_addr = %self.address(), "Shutting down the node.");

        self.gossip.stop();
        self.healer.stop();
        self.handle.core.transitions.cancel_all();
        self.transport.close().await;
    }
}

#[derive(Clone)]
/// A cheap handle to a running node.
pub struct SwimHandle {
    core: Arc<SwimCore>,
}

impl SwimHandle {
    #[inline]
    pub fn address(&self) -> &str {
        &self.core.address
    }

    #[inline]
    pub fn me(&self) -> Member {
        self.core.membership.local_member()
    }

    #[inline]
    pub fn members(&self) -> Vec<Member> {
        self.core.membership.snapshot()
    }

    #[inline]
    pub fn find_member(&self, address: &str) -> Option<Member> {
        self.core.membership.find(address)
    }

    #[inline]
    pub fn checksum(&self) -> u32 {
        self.core.membership.checksum()
    }

    #[inline]
    pub fn lookup(&self, key: impl AsRef<[u8]>) -> Option<String> {
        self.core.lookup(key)
    }

    #[inline]
    pub fn lookup_n(&self, key: impl AsRef<[u8]>, n: usize) -> Vec<String> {
        self.core.lookup_n(key, n)
    }

    #[inline]
    pub fn ring_checksum(&self) -> u32 {
        self.core.ring_checksum()
    }

    #[inline]
    /// The servers of the hash ring sorted by address.
    pub fn ring_servers(&self) -> Vec<String> {
        self.core.ring_servers()
    }

    #[inline]
    pub fn subscribe_ring(&self) -> broadcast::Receiver<RingEvent> {
        self.core.subscribe_ring()
    }

    #[inline]
    pub fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.core.membership.subscribe()
    }

    #[inline]
    pub fn subscribe_dissemination(&self) -> broadcast::Receiver<DisseminationEvent> {
        self.core.dissemination.subscribe()
    }

    #[inline]
    pub fn statistics(&self) -> ClusterStatistics {
        self.core.statistics.clone()
    }

    #[inline]
    /// The typed client over the node's transport.
    pub fn client(&self) -> &ProtocolClient {
        &self.core.client
    }

    #[inline]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.core.registry
    }

    pub fn add_handler(&self, endpoint: impl Into<String>, handler: impl MessageHandler) {
        self.core.registry.add_handler(endpoint, handler);
    }
}
