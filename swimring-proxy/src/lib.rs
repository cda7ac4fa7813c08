//! # Swimring Proxy
//!
//! Routes keyed requests to the member owning them on the swimring hash ring.
//!
//! The proxy attaches to a running [SwimNode] as an extension. Requests are
//! forwarded to the owner of their keys together with the sender's ring
//! checksum, the receiving member checks the checksum and its ownership of
//! the keys before handing the request to the application's [RequestHandler].
//! Failed forwards are retried on a schedule, re-resolving the owner each
//! time so requests follow the ring as it changes.
//!
//! ## Basic Example
//!
//! ```ignore
//! use swimring_node::rpc::Status;
//! use swimring_proxy::{ProxyConfig, ProxyRequest, ProxyResponse, RequestHandler, RequestProxyExtension};
//!
//! struct Greeter;
//!
//! #[async_trait::async_trait]
//! impl RequestHandler for Greeter {
//!     async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, Status> {
//!         Ok(ProxyResponse::new(200, format!("Hello, {}!", request.keys[0])))
//!     }
//! }
//!
//! let proxy = node
//!     .add_extension(RequestProxyExtension::new(ProxyConfig::default()).with_handler(Greeter))
//!     .await?;
//!
//! let resp = proxy
//!     .handle_or_proxy("bob", OutgoingRequest::new("/greet", Vec::new()))
//!     .await?;
//! ```

#[macro_use]
extern crate tracing;

mod backpressure;
mod config;
mod egress;
mod error;
mod ingress;
mod messages;
mod pending;
mod statistics;

use std::sync::Arc;

use async_trait::async_trait;
use swimring_node::rpc::Status;
use swimring_node::{ClusterExtension, SwimHandle, SwimNode};

use crate::backpressure::Backpressure;
pub use crate::config::ProxyConfig;
pub use crate::egress::ProxyOptions;
pub use crate::error::ProxyError;
use crate::ingress::ProxyService;
pub use crate::ingress::RequestHandler;
pub use crate::messages::{
    Header,
    OutgoingRequest,
    ProxyRequest,
    ProxyResponse,
    PROXY_ENDPOINT,
};
use crate::pending::PendingRequests;
pub use crate::statistics::ProxyStatistics;
use crate::statistics::ProxyStatisticsInner;

/// Attaches a [RequestProxy] to a node.
pub struct RequestProxyExtension {
    config: ProxyConfig,
    handler: Option<Arc<dyn RequestHandler>>,
}

impl RequestProxyExtension {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            handler: None,
        }
    }

    /// Set the handler serving requests owned by the local node.
    ///
    /// Without a handler the proxy only forwards requests, anything routed
    /// to the local node is rejected.
    pub fn with_handler(mut self, handler: impl RequestHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

#[async_trait]
impl ClusterExtension for RequestProxyExtension {
    type Output = RequestProxy;
    type Error = ProxyError;

    async fn init_extension(self, node: &SwimNode) -> Result<Self::Output, Self::Error> {
        RequestProxy::create(node.handle(), self.config, self.handler)
    }
}

pub(crate) struct ProxyInner {
    node: SwimHandle,
    config: ProxyConfig,
    handler: Option<Arc<dyn RequestHandler>>,
    statistics: ProxyStatistics,
    backpressure: Arc<Backpressure>,
    pending: Arc<PendingRequests>,
}

impl ProxyInner {
    async fn handle_locally(&self, req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        ProxyStatisticsInner::incr(&self.statistics.requests_handled_locally);

        let handler = self.handler.as_ref().ok_or_else(|| {
            ProxyError::Handler(Status::unavailable(
                "No request handler is registered on this node.",
            ))
        })?;

        handler.handle(req).await.map_err(ProxyError::Handler)
    }
}

#[derive(Clone)]
/// Forwards requests to the owner of their keys.
pub struct RequestProxy {
    inner: Arc<ProxyInner>,
}

impl RequestProxy {
    fn create(
        node: SwimHandle,
        config: ProxyConfig,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Result<Self, ProxyError> {
        config.validate()?;

        let statistics = ProxyStatistics::default();
        let backpressure = Arc::new(Backpressure::new(
            config.max_inflight_requests,
            config.max_event_loop_lag,
            statistics.clone(),
        ));
        backpressure.start_lag_sampler(config.lag_sample_interval);

        let pending = Arc::new(PendingRequests::new(statistics.clone()));
        pending.start_wedge_scanner(config.wedge_timeout, config.wedge_scan_interval);

        let inner = Arc::new(ProxyInner {
            node,
            config,
            handler,
            statistics,
            backpressure,
            pending,
        });
        inner
            .node
            .add_handler(PROXY_ENDPOINT, ProxyService(inner.clone()));

        info!(self_addr = %inner.node.address(), "Request proxy attached.");

        Ok(Self { inner })
    }

    #[inline]
    /// Gets the live proxy statistics.
    pub fn statistics(&self) -> ProxyStatistics {
        self.inner.statistics.clone()
    }

    #[inline]
    /// The node the proxy is attached to.
    pub fn node(&self) -> &SwimHandle {
        &self.inner.node
    }

    #[inline]
    /// The number of requests currently tracked by the proxy.
    pub fn num_pending(&self) -> usize {
        self.inner.pending.len()
    }

    /// Forwards the request to the member owning its keys.
    ///
    /// Every key must be owned by the same member, otherwise the request
    /// fails with [ProxyError::KeysDiverged]. Failed attempts are retried
    /// following the retry schedule, if the keys move to the local node in
    /// the meantime the request is handled locally.
    pub async fn proxy_req(
        &self,
        request: OutgoingRequest,
        options: ProxyOptions,
    ) -> Result<ProxyResponse, ProxyError> {
        egress::proxy_req(&self.inner, request, options).await
    }

    /// Handles the request locally if the node owns the key, otherwise it
    /// is forwarded to the owner.
    pub async fn handle_or_proxy(
        &self,
        key: &str,
        request: OutgoingRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        egress::handle_or_proxy(&self.inner, key, request).await
    }

    /// Stops the proxy, aborting every pending request.
    ///
    /// Requests issued or received afterwards fail with [ProxyError::Destroyed].
    pub fn destroy(&self) {
        self.inner.backpressure.stop_lag_sampler();
        self.inner.node.registry().remove_handler(PROXY_ENDPOINT);
        let aborted = self.inner.pending.destroy();

        info!(
            self_addr = %self.inner.node.address(),
            aborted = aborted,
            "Request proxy destroyed."
        );
    }
}
