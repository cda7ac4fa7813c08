use std::sync::Arc;

use async_trait::async_trait;
use rkyv::AlignedVec;
use swimring_node::rpc::{decode, encode, ErrorCode, MessageHandler, Status};

use crate::messages::{ProxyRequest, ProxyResponse};
use crate::statistics::ProxyStatisticsInner;
use crate::ProxyInner;

#[async_trait]
/// The application logic serving requests owned by the local node.
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, Status>;
}

/// Receives requests forwarded by other members.
pub(crate) struct ProxyService(pub(crate) Arc<ProxyInner>);

#[async_trait]
impl MessageHandler for ProxyService {
    async fn handle(&self, payload: AlignedVec) -> Result<AlignedVec, Status> {
        let req = decode::<ProxyRequest>(&payload)?;
        let resp = handle_request(&self.0, req).await?;
        encode(&resp)
    }
}

/// Validates a forwarded request against the local ring before passing it
/// to the application handler.
pub(crate) async fn handle_request(
    inner: &ProxyInner,
    req: ProxyRequest,
) -> Result<ProxyResponse, Status> {
    ProxyStatisticsInner::incr(&inner.statistics.requests_received);
    let _slot = inner.backpressure.try_acquire().map_err(|e| e.to_status())?;

    let checksum = inner.node.ring_checksum();
    if req.checksum != checksum {
        ProxyStatisticsInner::incr(&inner.statistics.checksum_mismatches);
        warn!(
            self_addr = %inner.node.address(),
            source = %req.source,
            endpoint = %req.endpoint,
            expected = checksum,
            actual = req.checksum,
            enforced = inner.config.enforce_consistency,
            "Received proxied request with a different ring checksum."
        );

        if inner.config.enforce_consistency {
            return Err(Status::new(
                ErrorCode::InvalidChecksum,
                format!(
                    "Expected ring checksum {checksum} but the request was routed with {}.",
                    req.checksum
                ),
            ));
        }
    }

    if inner.config.enforce_key_ownership {
        let not_owned = req
            .keys
            .iter()
            .filter(|key| inner.node.lookup(key.as_str()).as_deref() != Some(inner.node.address()))
            .cloned()
            .collect::<Vec<_>>();

        if !not_owned.is_empty() {
            ProxyStatisticsInner::incr(&inner.statistics.keys_not_owned);
            warn!(
                self_addr = %inner.node.address(),
                source = %req.source,
                keys = ?not_owned,
                "Received proxied request for keys owned by another member."
            );
            return Err(Status::new(
                ErrorCode::KeysNotOwned,
                format!("Keys {not_owned:?} are not owned by {}.", inner.node.address()),
            ));
        }
    }

    inner
        .pending
        .track(inner.handle_locally(req))
        .await
        .map_err(|e| e.to_status())
}
