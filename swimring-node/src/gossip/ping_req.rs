use futures::stream::FuturesUnordered;
use futures::StreamExt;

use crate::error::PingReqError;
use crate::gossip::ping::send_ping;
use crate::rpc::messages::{PingReqRequest, PingReqResponse};
use crate::state::SwimCore;
use crate::statistics::ClusterStatisticsInner;

#[derive(Debug, Clone, PartialEq, Eq)]
/// The conclusion of an indirect probe.
pub enum PingReqOutcome {
    /// A relay managed to reach the target.
    Reachable { relay: String },
    /// At least one relay reported the target as unreachable and no relay
    /// reached it, the target has been marked suspect.
    Unreachable {
        relays: Vec<String>,
        incarnation_number: Option<i64>,
    },
}

/// Asks up to `ping_req_size` random members to ping the target on our behalf.
///
/// The first relay to reach the target settles the round, the remaining
/// relays are dropped.
pub(crate) async fn send_ping_req(
    core: &SwimCore,
    target: &str,
) -> Result<PingReqOutcome, PingReqError> {
    let incarnation_number = core.membership.find(target).map(|m| m.incarnation_number);
    let relays = core.with_rng(|rng| {
        core.membership
            .random_pingable_members(core.config.ping_req_size, &[target], rng)
    });

    if relays.is_empty() {
        warn!(
            self_addr = %core.address,
            target_addr = %target,
            "No members available to relay ping-req, marking target suspect."
        );
        if let Some(incarnation_number) = incarnation_number {
            core.make_suspect(target, incarnation_number);
        }
        return Err(PingReqError::NoMembers {
            target: target.to_string(),
        });
    }

    let mut pending = relays
        .into_iter()
        .map(|relay| {
            let msg = PingReqRequest {
                checksum: core.membership.checksum(),
                changes: core.dissemination.issue_as_sender(),
                source: core.address.clone(),
                source_incarnation_number: core.local_incarnation(),
                target: target.to_string(),
            };
            ClusterStatisticsInner::incr(&core.statistics.ping_reqs_sent);

            async move {
                let result = core
                    .client
                    .ping_req(&relay, &msg, core.config.ping_req_timeout)
                    .await;
                (relay, result)
            }
        })
        .collect::<FuturesUnordered<_>>();

    let mut unreachable = Vec::new();
    let mut errors = Vec::new();
    while let Some((relay, result)) = pending.next().await {
        match result {
            Ok(resp) => {
                core.apply_changes(&resp.changes);

                if resp.ping_status {
                    debug!(
                        self_addr = %core.address,
                        target_addr = %target,
                        relay = %relay,
                        "Target reached through relay."
                    );
                    return Ok(PingReqOutcome::Reachable { relay });
                }

                unreachable.push(relay);
            },
            Err(e) => {
                debug!(
                    self_addr = %core.address,
                    target_addr = %target,
                    relay = %relay,
                    error = %e,
                    "Relay failed to answer ping-req."
                );
                errors.push(e);
            },
        }
    }

    if unreachable.is_empty() {
        warn!(
            self_addr = %core.address,
            target_addr = %target,
            num_errors = errors.len(),
            "Ping-req was inconclusive."
        );
        return Err(PingReqError::Inconclusive {
            target: target.to_string(),
            errors,
        });
    }

    if let Some(incarnation_number) = incarnation_number {
        core.make_suspect(target, incarnation_number);
    }

    Ok(PingReqOutcome::Unreachable {
        relays: unreachable,
        incarnation_number,
    })
}

/// Answers a ping-req by pinging the target on behalf of the source.
pub(crate) async fn handle_ping_req(core: &SwimCore, req: PingReqRequest) -> PingReqResponse {
    core.apply_changes(&req.changes);

    let ping_status = match send_ping(core, &req.target, Vec::new()).await {
        Ok(()) => true,
        Err(e) => {
            debug!(
                self_addr = %core.address,
                source = %req.source,
                error = %e,
                "Relayed ping failed."
            );
            false
        },
    };

    let issued =
        core.issue_as_receiver(&req.source, req.source_incarnation_number, req.checksum);
    PingReqResponse {
        changes: issued.changes,
        ping_status,
        target: req.target,
    }
}
