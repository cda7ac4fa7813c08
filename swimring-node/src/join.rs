use std::collections::BTreeSet;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tokio::time::Instant;

use crate::config::{host_of, validate_address};
use crate::error::{JoinError, TransportError};
use crate::member::{merge_changes, Change};
use crate::rpc::messages::{JoinRequest, JoinResponse};
use crate::rpc::{ErrorCode, Status};
use crate::state::SwimCore;
use crate::statistics::ClusterStatisticsInner;

#[derive(Debug, Clone)]
/// The result of a successful join.
pub struct JoinOutcome {
    /// The nodes which accepted our join.
    pub joined: Vec<String>,
    /// The number of groups of join requests sent.
    pub attempts: usize,
    /// The changes applied from the coordinators' snapshots.
    pub applied: usize,
}

/// The candidates of a single join round.
///
/// A round is fixed when created, nodes are handed out preferring nodes on
/// a different host to the local node.
struct JoinRound {
    preferred: Vec<String>,
    fallback: Vec<String>,
}

impl JoinRound {
    fn new(local: &str, candidates: impl IntoIterator<Item = String>) -> Self {
        let local_host = host_of(local);
        let (fallback, preferred) = candidates
            .into_iter()
            .partition(|candidate| host_of(candidate) == local_host);

        Self {
            preferred,
            fallback,
        }
    }

    fn is_empty(&self) -> bool {
        self.preferred.is_empty() && self.fallback.is_empty()
    }

    /// Takes up to `size` nodes out of the round.
    fn take_group<R: Rng + ?Sized>(&mut self, size: usize, rng: &mut R) -> Vec<String> {
        let mut group = take_random(&mut self.preferred, size, rng);
        let remaining = size - group.len();
        group.extend(take_random(&mut self.fallback, remaining, rng));
        group
    }
}

fn take_random<R: Rng + ?Sized>(pool: &mut Vec<String>, n: usize, rng: &mut R) -> Vec<String> {
    let mut taken = Vec::with_capacity(n.min(pool.len()));
    while taken.len() < n && !pool.is_empty() {
        let idx = rng.gen_range(0..pool.len());
        taken.push(pool.swap_remove(idx));
    }
    taken
}

/// Joins the cluster through the given seed hosts.
///
/// Join requests are sent in groups until `join_size` nodes accepted the
/// join. The snapshots returned by those nodes are applied once at the end.
pub(crate) async fn join_cluster(
    core: &SwimCore,
    seeds: &[String],
) -> Result<JoinOutcome, JoinError> {
    if seeds.is_empty() {
        return Err(JoinError::NoSeeds);
    }

    let potential = seeds
        .iter()
        .filter(|seed| seed.as_str() != core.address)
        .cloned()
        .collect::<BTreeSet<_>>();

    if potential.is_empty() {
        info!(self_addr = %core.address, "Only seed is the local node, join complete.");
        return Ok(JoinOutcome {
            joined: Vec::new(),
            attempts: 0,
            applied: 0,
        });
    }

    let config = &core.config;
    let join_size = config.join_size.min(potential.len());
    let start = Instant::now();

    let request = JoinRequest {
        app: config.app.clone(),
        source: core.address.clone(),
        incarnation_number: core.local_incarnation(),
    };

    let mut joined = BTreeSet::new();
    let mut responses = Vec::<JoinResponse>::new();
    let mut attempts = 0;
    let mut round = JoinRound::new(&core.address, potential.iter().cloned());

    loop {
        let needed = join_size - joined.len();

        if round.is_empty() {
            round = JoinRound::new(
                &core.address,
                potential.difference(&joined).cloned(),
            );
        }

        let group_size = config.parallelism_factor * needed;
        let group = core.with_rng(|rng| round.take_group(group_size, rng));

        attempts += 1;
        ClusterStatisticsInner::incr(&core.statistics.join_attempts);
        debug!(
            self_addr = %core.address,
            group = ?group,
            attempt = attempts,
            "Sending join group."
        );

        let results = join_all(
            group
                .iter()
                .map(|target| core.client.join(target, &request, config.join_timeout)),
        )
        .await;

        for (target, result) in group.into_iter().zip(results) {
            match result {
                Ok(resp) => {
                    joined.insert(target);
                    responses.push(resp);
                },
                Err(e) => log_join_failure(&core.address, &target, &e),
            }
        }

        if joined.len() >= join_size {
            break;
        }

        let elapsed = start.elapsed();
        if elapsed >= config.max_join_duration {
            warn!(
                self_addr = %core.address,
                elapsed = ?elapsed,
                joined = joined.len(),
                join_size = join_size,
                "Join duration exceeded."
            );
            return Err(JoinError::DurationExceeded {
                elapsed,
                max_duration: config.max_join_duration,
                joined: joined.len(),
                join_size,
            });
        }

        if attempts >= config.max_join_attempts {
            warn!(
                self_addr = %core.address,
                attempts = attempts,
                joined = joined.len(),
                join_size = join_size,
                "Join attempts exceeded."
            );
            return Err(JoinError::MaxAttemptsExceeded {
                max_attempts: config.max_join_attempts,
                joined: joined.len(),
                join_size,
            });
        }

        let delay = core.with_rng(|rng| {
            backoff_delay(
                attempts,
                config.join_backoff_min,
                config.join_backoff_max,
                rng,
            )
        });
        tokio::time::sleep(delay).await;
    }

    let applied = core.apply_changes(&snapshot_changes(responses)).len();

    info!(
        self_addr = %core.address,
        joined = ?joined,
        attempts = attempts,
        elapsed = ?start.elapsed(),
        "Joined cluster."
    );

    Ok(JoinOutcome {
        joined: joined.into_iter().collect(),
        attempts,
        applied,
    })
}

/// Combines the snapshots of every coordinator.
///
/// Identical snapshots are taken as is, diverging snapshots are merged
/// keeping the strongest claim per member.
pub(crate) fn snapshot_changes(mut responses: Vec<JoinResponse>) -> Vec<Change> {
    let Some(first) = responses.first() else {
        return Vec::new();
    };

    let checksum = first.membership_checksum;
    if responses.iter().all(|r| r.membership_checksum == checksum) {
        return responses.swap_remove(0).membership;
    }

    merge_changes(responses.into_iter().map(|r| r.membership))
}

/// Exponential backoff starting at `min` and doubling up to `max`, with up
/// to 50% of random fuzz added on top.
pub(crate) fn backoff_delay<R: Rng + ?Sized>(
    attempt: usize,
    min: Duration,
    max: Duration,
    rng: &mut R,
) -> Duration {
    let exp = attempt.saturating_sub(1).min(31) as u32;
    let base = min.saturating_mul(2u32.saturating_pow(exp)).min(max);

    let max_fuzz = base.as_millis() as u64 / 2;
    let fuzz = if max_fuzz == 0 {
        0
    } else {
        rng.gen_range(0..=max_fuzz)
    };

    base + Duration::from_millis(fuzz)
}

fn log_join_failure(self_addr: &str, target: &str, error: &TransportError) {
    match error.status() {
        Some(status) => warn!(
            self_addr = %self_addr,
            target_addr = %target,
            code = status.code.as_str(),
            reason = %status.message,
            "Join request was rejected."
        ),
        None => debug!(
            self_addr = %self_addr,
            target_addr = %target,
            error = %error,
            "Join request failed."
        ),
    }
}

/// Validates an incoming join and produces the snapshot to answer with.
pub(crate) fn handle_join(core: &SwimCore, req: JoinRequest) -> Result<JoinResponse, Status> {
    if core.denies_joins() {
        return Err(Status::new(
            ErrorCode::JoinDenied,
            "Node is currently denying joins.",
        ));
    }

    if validate_address(&req.source).is_err() {
        return Err(Status::new(
            ErrorCode::JoinInvalidSource,
            format!("{:?} is not a valid host:port address.", req.source),
        ));
    }

    if req.source == core.address {
        return Err(Status::new(
            ErrorCode::JoinSelf,
            "A node cannot join itself.",
        ));
    }

    if req.app != core.config.app {
        return Err(Status::new(
            ErrorCode::JoinAppMismatch,
            format!(
                "Node belongs to app {:?} but {:?} was requested.",
                core.config.app, req.app
            ),
        ));
    }

    if let Some(pattern) = core
        .config
        .blacklist
        .iter()
        .find(|pattern| wildcard_match(pattern, &req.source))
    {
        return Err(Status::new(
            ErrorCode::JoinBlacklisted,
            format!("{} matches blacklisted pattern {:?}.", req.source, pattern),
        ));
    }

    core.make_alive(&req.source, req.incarnation_number);
    debug!(
        self_addr = %core.address,
        source = %req.source,
        incarnation = req.incarnation_number,
        "Accepted join."
    );

    Ok(JoinResponse {
        app: core.config.app.clone(),
        coordinator: core.address.clone(),
        membership: core.membership.as_changes(),
        membership_checksum: core.membership.checksum(),
    })
}

/// Matches `value` against a pattern where `*` matches any sequence of characters.
pub(crate) fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pattern = pattern.as_bytes();
    let value = value.as_bytes();

    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, v));
            p += 1;
        } else if p < pattern.len() && pattern[p] == value[v] {
            p += 1;
            v += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            v = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == b'*')
}
