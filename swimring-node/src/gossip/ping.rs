use crate::error::PingError;
use crate::member::Change;
use crate::rpc::messages::{PingRequest, PingResponse};
use crate::state::SwimCore;
use crate::statistics::ClusterStatisticsInner;

/// Pings the target directly, piggybacking the pending changes and any
/// `extra` changes on top.
///
/// The changes returned by the target are applied before returning.
pub(crate) async fn send_ping(
    core: &SwimCore,
    target: &str,
    extra: Vec<Change>,
) -> Result<(), PingError> {
    let mut changes = core.dissemination.issue_as_sender();
    changes.extend(extra);

    let msg = PingRequest {
        checksum: core.membership.checksum(),
        changes,
        source: core.address.clone(),
        source_incarnation_number: core.local_incarnation(),
    };

    ClusterStatisticsInner::incr(&core.statistics.pings_sent);
    match core.client.ping(target, &msg, core.config.ping_timeout).await {
        Ok(resp) => {
            core.apply_changes(&resp.changes);
            trace!(
                self_addr = %core.address,
                target_addr = %target,
                num_changes = resp.changes.len(),
                "Ping acknowledged."
            );
            Ok(())
        },
        Err(e) => {
            ClusterStatisticsInner::incr(&core.statistics.ping_failures);
            Err(PingError {
                target: target.to_string(),
                source: e,
            })
        },
    }
}

/// Answers a ping from another member.
pub(crate) fn handle_ping(core: &SwimCore, req: PingRequest) -> PingResponse {
    core.apply_changes(&req.changes);

    let issued =
        core.issue_as_receiver(&req.source, req.source_incarnation_number, req.checksum);
    PingResponse {
        changes: issued.changes,
    }
}
