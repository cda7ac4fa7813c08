use std::sync::Arc;

use async_trait::async_trait;
use rkyv::AlignedVec;

use crate::gossip::ping::handle_ping;
use crate::gossip::ping_req::handle_ping_req;
use crate::join::handle_join;
use crate::rpc::messages::{JoinRequest, PingReqRequest, PingRequest};
use crate::rpc::{
    decode,
    encode,
    MessageHandler,
    ServiceRegistry,
    Status,
    JOIN_ENDPOINT,
    PING_ENDPOINT,
    PING_REQ_ENDPOINT,
};
use crate::state::SwimCore;

/// Registers the membership protocol handlers.
pub(crate) fn register_protocol(registry: &ServiceRegistry, core: &Arc<SwimCore>) {
    registry.add_handler(PING_ENDPOINT, PingService(core.clone()));
    registry.add_handler(PING_REQ_ENDPOINT, PingReqService(core.clone()));
    registry.add_handler(JOIN_ENDPOINT, JoinService(core.clone()));
}

pub(crate) struct PingService(Arc<SwimCore>);

#[async_trait]
impl MessageHandler for PingService {
    async fn handle(&self, payload: AlignedVec) -> Result<AlignedVec, Status> {
        let req = decode::<PingRequest>(&payload)?;
        encode(&handle_ping(&self.0, req))
    }
}

pub(crate) struct PingReqService(Arc<SwimCore>);

#[async_trait]
impl MessageHandler for PingReqService {
    async fn handle(&self, payload: AlignedVec) -> Result<AlignedVec, Status> {
        let req = decode::<PingReqRequest>(&payload)?;
        let resp = handle_ping_req(&self.0, req).await;
        encode(&resp)
    }
}

pub(crate) struct JoinService(Arc<SwimCore>);

#[async_trait]
impl MessageHandler for JoinService {
    async fn handle(&self, payload: AlignedVec) -> Result<AlignedVec, Status> {
        let req = decode::<JoinRequest>(&payload)?;
        let source = req.source.clone();

        match handle_join(&self.0, req) {
            Ok(resp) => encode(&resp),
            Err(status) => {
                warn!(
                    self_addr = %self.0.address,
                    source = %source,
                    code = status.code.as_str(),
                    reason = %status.message,
                    "Rejected join request."
                );
                Err(status)
            },
        }
    }
}
