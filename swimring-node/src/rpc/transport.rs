use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rkyv::de::deserializers::SharedDeserializeMap;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{AlignedVec, Archive, CheckBytes, Deserialize, Serialize};

use crate::error::TransportError;
use crate::rpc::messages::{
    JoinRequest,
    JoinResponse,
    PingReqRequest,
    PingReqResponse,
    PingRequest,
    PingResponse,
};
use crate::rpc::{
    decode,
    encode,
    ServiceRegistry,
    JOIN_ENDPOINT,
    PING_ENDPOINT,
    PING_REQ_ENDPOINT,
    SCRATCH_SPACE,
};

#[async_trait]
/// The channel used to exchange messages with other members.
///
/// A transport moves opaque archived payloads between addresses, remote
/// failures must be surfaced as [TransportError::Remote] carrying the
/// status produced by the remote handler.
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload to the endpoint on the target member and waits for the reply.
    ///
    /// Expiry of the timeout is reported as [TransportError::Timeout].
    async fn send(
        &self,
        target: &str,
        endpoint: &str,
        payload: AlignedVec,
        timeout: Duration,
    ) -> Result<AlignedVec, TransportError>;

    /// Waits until the transport is able to address the target member.
    async fn wait_for_identified(&self, _target: &str) -> Result<(), TransportError> {
        Ok(())
    }

    /// Starts serving incoming messages for `local` through the registry.
    async fn listen(
        &self,
        local: &str,
        registry: ServiceRegistry,
    ) -> Result<(), TransportError>;

    /// Stops serving incoming messages.
    async fn close(&self) {}
}

#[derive(Clone)]
/// A typed client over the node's transport.
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    #[inline]
    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Sends a typed message to the given endpoint and decodes the reply.
    pub async fn call<Req, Resp>(
        &self,
        target: &str,
        endpoint: &str,
        msg: &Req,
        timeout: Duration,
    ) -> Result<Resp, TransportError>
    where
        Req: Serialize<AllocSerializer<SCRATCH_SPACE>>,
        Resp: Archive,
        Resp::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<Resp, SharedDeserializeMap>,
    {
        let payload = encode(msg).map_err(TransportError::InvalidPayload)?;
        let resp = self
            .transport
            .send(target, endpoint, payload, timeout)
            .await?;
        decode::<Resp>(&resp).map_err(TransportError::InvalidPayload)
    }

    pub async fn ping(
        &self,
        target: &str,
        msg: &PingRequest,
        timeout: Duration,
    ) -> Result<PingResponse, TransportError> {
        self.call(target, PING_ENDPOINT, msg, timeout).await
    }

    pub async fn ping_req(
        &self,
        relay: &str,
        msg: &PingReqRequest,
        timeout: Duration,
    ) -> Result<PingReqResponse, TransportError> {
        self.call(relay, PING_REQ_ENDPOINT, msg, timeout).await
    }

    /// Sends a join request to the target.
    ///
    /// Transport level failures are retried once, rejections by the remote
    /// are returned immediately.
    pub async fn join(
        &self,
        target: &str,
        msg: &JoinRequest,
        timeout: Duration,
    ) -> Result<JoinResponse, TransportError> {
        match self.call(target, JOIN_ENDPOINT, msg, timeout).await {
            Err(e) if e.is_retryable() => {
                debug!(target_addr = %target, error = %e, "Retrying join request.");
                self.call(target, JOIN_ENDPOINT, msg, timeout).await
            },
            other => other,
        }
    }
}
