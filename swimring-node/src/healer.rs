use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tokio::sync::oneshot;

use crate::gossip::ping::send_ping;
use crate::member::{Change, MemberStatus};
use crate::rpc::messages::JoinRequest;
use crate::state::SwimCore;
use crate::statistics::ClusterStatisticsInner;

/// Reconciles the local node with members it considers faulty.
///
/// A network partition leaves each side believing the other side is
/// faulty, the healer contacts those members directly and forces both
/// sides to reincarnate so their alive status propagates again.
pub struct PartitionHealer {
    core: Arc<SwimCore>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl PartitionHealer {
    pub(crate) fn new(core: Arc<SwimCore>) -> Self {
        Self {
            core,
            stop_tx: Mutex::new(None),
        }
    }

    /// Starts running healing passes every `heal_period`.
    pub fn start(self: &Arc<Self>) {
        let mut stop_tx = self.stop_tx.lock();
        if stop_tx.is_some() {
            return;
        }

        let (tx, mut rx) = oneshot::channel();
        *stop_tx = Some(tx);

        let healer = self.clone();
        tokio::spawn(async move {
            let period = healer.core.config.heal_period;
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = tokio::time::sleep(period) => {},
                }

                tokio::select! {
                    _ = &mut rx => break,
                    attempted = healer.heal() => {
                        if !attempted.is_empty() {
                            debug!(
                                self_addr = %healer.core.address,
                                attempted = ?attempted,
                                "Healing pass complete."
                            );
                        }
                    },
                }
            }
        });
    }

    pub fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    /// Runs a single healing pass, returning the addresses which were contacted.
    pub async fn heal(&self) -> Vec<String> {
        let core = &self.core;

        let mut targets = core.membership.faulty_addresses();
        targets.dedup();
        core.with_rng(|rng| targets.shuffle(rng));
        targets.truncate(core.config.heal_max_targets);

        for target in targets.iter() {
            ClusterStatisticsInner::incr(&core.statistics.heal_attempts);
            if let Err(e) = self.heal_with(target).await {
                debug!(
                    self_addr = %core.address,
                    target_addr = %target,
                    error = %e,
                    "Unable to heal with target."
                );
            }
        }

        targets
    }

    async fn heal_with(&self, target: &str) -> Result<(), crate::error::TransportError> {
        let core = &self.core;

        let request = JoinRequest {
            app: core.config.app.clone(),
            source: core.address.clone(),
            incarnation_number: core.local_incarnation(),
        };
        let resp = core
            .client
            .join(target, &request, core.config.join_timeout)
            .await?;

        info!(
            self_addr = %core.address,
            target_addr = %target,
            "Reached faulty member, healing partition."
        );

        let target_incarnation = resp
            .membership
            .iter()
            .find(|c| c.address == target)
            .map(|c| c.incarnation_number)
            .unwrap_or_default();
        let local_claim = core
            .membership
            .find(target)
            .filter(|m| m.status == MemberStatus::Faulty)
            .map(|m| m.incarnation_number);
        let remote_claim = resp
            .membership
            .iter()
            .find(|c| c.address == core.address && c.status == MemberStatus::Faulty)
            .map(|c| c.incarnation_number);

        // Reincarnate ourselves, the refutation is piggybacked onto the ping below.
        if let Some(incarnation_number) = remote_claim {
            let claim = Change::new(
                core.address.as_str(),
                MemberStatus::Suspect,
                incarnation_number.max(core.local_incarnation()),
                target,
                target_incarnation,
            );
            core.apply_changes(&[claim]);
        }

        // The target refutes our suspicion and answers with its new incarnation.
        let mut extra = Vec::new();
        if let Some(incarnation_number) = local_claim {
            extra.push(Change::new(
                target,
                MemberStatus::Suspect,
                incarnation_number.max(target_incarnation),
                core.address.as_str(),
                core.local_incarnation(),
            ));
        }
        if remote_claim.is_some() || local_claim.is_some() {
            if let Err(e) = send_ping(core, target, extra).await {
                debug!(
                    self_addr = %core.address,
                    target_addr = %target,
                    error = %e,
                    "Failed to ping target while healing."
                );
            }
        }

        core.apply_changes(&resp.membership);
        Ok(())
    }
}
