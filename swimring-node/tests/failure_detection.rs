use std::time::Duration;

use swimring_node::rpc::PING_ENDPOINT;
use swimring_node::{
    MemberStatus,
    NodeError,
    PingReqError,
    PingReqOutcome,
    SwimConfig,
    SwimNode,
    SwimNodeBuilder,
    TickOutcome,
};
use test_helper::{get_unused_addr, LocalNetwork};

async fn start_node(
    network: &LocalNetwork,
    addr: &str,
    seeds: &[&str],
) -> Result<SwimNode, NodeError> {
    SwimNodeBuilder::new(addr, SwimConfig::default())
        .with_seeds(seeds.to_vec())
        .with_autostart(false)
        .connect(network.transport(addr))
        .await
}

fn status_of(node: &SwimNode, addr: &str) -> Option<(MemberStatus, i64)> {
    node.find_member(addr)
        .map(|m| (m.status, m.incarnation_number))
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_member_becomes_suspect() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let node_1_addr = get_unused_addr();
    let node_2_addr = get_unused_addr();

    let node_1 = start_node(&network, &node_1_addr, &[&node_1_addr]).await?;
    let node_2 = start_node(&network, &node_2_addr, &[&node_1_addr]).await?;

    let outcome = node_1.tick().await;
    assert!(matches!(outcome, TickOutcome::Acked { .. }), "{outcome:?}");

    let (_, incarnation) = status_of(&node_1, &node_2_addr).expect("Member should exist");
    network.block_endpoint(&node_2_addr, PING_ENDPOINT);

    let outcome = node_1.tick().await;
    match outcome {
        TickOutcome::Indirect {
            target,
            ping_error,
            result,
        } => {
            assert_eq!(target, node_2_addr);
            assert_eq!(ping_error.source.kind(), "timeout");
            assert!(matches!(result, Err(PingReqError::NoMembers { .. })));
        },
        other => panic!("Expected an indirect probe, got {other:?}"),
    }
    assert_eq!(
        status_of(&node_1, &node_2_addr),
        Some((MemberStatus::Suspect, incarnation)),
    );
    assert_eq!(node_1.statistics().suspects_marked(), 1);
    // Suspects stay routable until they are declared faulty.
    assert!(node_1.handle().ring_servers().contains(&node_2_addr));

    let suspect_timeout = SwimConfig::default().suspect_timeout;
    tokio::time::sleep(suspect_timeout + Duration::from_millis(100)).await;
    assert_eq!(
        status_of(&node_1, &node_2_addr),
        Some((MemberStatus::Faulty, incarnation)),
    );
    assert_eq!(node_1.handle().ring_servers(), vec![node_1_addr.clone()]);

    // Hearing of the suspicion makes the member refute it.
    network.unblock_endpoint(&node_2_addr, PING_ENDPOINT);
    node_1.ping(&node_2_addr).await?;
    node_2.ping(&node_1_addr).await?;

    let (status, refuted) = status_of(&node_1, &node_2_addr).expect("Member should exist");
    assert_eq!(status, MemberStatus::Alive);
    assert!(refuted > incarnation);
    assert_eq!(node_2.statistics().refutations(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ping_req_outcomes() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let node_1_addr = get_unused_addr();
    let node_2_addr = get_unused_addr();
    let node_3_addr = get_unused_addr();

    let node_1 = start_node(&network, &node_1_addr, &[&node_1_addr]).await?;
    let _node_2 = start_node(&network, &node_2_addr, &[&node_1_addr]).await?;
    let _node_3 = start_node(&network, &node_3_addr, &[&node_1_addr, &node_2_addr]).await?;

    let (_, incarnation) = status_of(&node_1, &node_3_addr).expect("Member should exist");

    // The only relay cannot be reached.
    network.block_link(&node_1_addr, &node_2_addr);
    let err = node_1
        .ping_req(&node_3_addr)
        .await
        .expect_err("Relay should be unreachable");
    assert!(matches!(err, PingReqError::Inconclusive { ref errors, .. } if errors.len() == 1));
    assert_eq!(
        status_of(&node_1, &node_3_addr),
        Some((MemberStatus::Alive, incarnation)),
    );
    network.unblock_link(&node_1_addr, &node_2_addr);

    // Only the direct route is broken.
    network.block_link(&node_1_addr, &node_3_addr);
    assert!(node_1.ping(&node_3_addr).await.is_err());
    let outcome = node_1.ping_req(&node_3_addr).await?;
    assert_eq!(
        outcome,
        PingReqOutcome::Reachable {
            relay: node_2_addr.clone()
        }
    );
    network.unblock_link(&node_1_addr, &node_3_addr);

    // Nobody can reach the target.
    network.block_endpoint(&node_3_addr, PING_ENDPOINT);
    let outcome = node_1.ping_req(&node_3_addr).await?;
    assert_eq!(
        outcome,
        PingReqOutcome::Unreachable {
            relays: vec![node_2_addr.clone()],
            incarnation_number: Some(incarnation),
        }
    );
    assert_eq!(
        status_of(&node_1, &node_3_addr),
        Some((MemberStatus::Suspect, incarnation)),
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ping_req_with_disagreeing_relays() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let node_1_addr = get_unused_addr();
    let relay_addrs = [get_unused_addr(), get_unused_addr(), get_unused_addr()];
    let target_addr = get_unused_addr();

    let node_1 = start_node(&network, &node_1_addr, &[&node_1_addr]).await?;
    let mut relays = Vec::new();
    for addr in relay_addrs.iter() {
        relays.push(start_node(&network, addr, &[&node_1_addr]).await?);
    }
    let _target = start_node(&network, &target_addr, &[&node_1_addr]).await?;
    assert_eq!(node_1.members().len(), 5);
    assert_eq!(SwimConfig::default().ping_req_size, 3);

    let (_, incarnation) = status_of(&node_1, &target_addr).expect("Member should exist");

    // One relay fails to reach the target while the other two never answer.
    network.block_link(&relay_addrs[0], &target_addr);
    network.block_link(&node_1_addr, &relay_addrs[1]);
    network.block_link(&node_1_addr, &relay_addrs[2]);

    let outcome = node_1.ping_req(&target_addr).await?;
    assert_eq!(
        outcome,
        PingReqOutcome::Unreachable {
            relays: vec![relay_addrs[0].clone()],
            incarnation_number: Some(incarnation),
        }
    );
    assert_eq!(
        status_of(&node_1, &target_addr),
        Some((MemberStatus::Suspect, incarnation)),
    );

    // A single relay reaching the target settles the round.
    network.unblock_link(&relay_addrs[0], &target_addr);
    network.unblock_link(&node_1_addr, &relay_addrs[1]);
    network.block_link(&relay_addrs[1], &target_addr);

    let outcome = node_1.ping_req(&target_addr).await?;
    assert_eq!(
        outcome,
        PingReqOutcome::Reachable {
            relay: relay_addrs[0].clone()
        }
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_partition_heals() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let node_1_addr = get_unused_addr();
    let node_2_addr = get_unused_addr();

    let node_1 = start_node(&network, &node_1_addr, &[&node_1_addr]).await?;
    let node_2 = start_node(&network, &node_2_addr, &[&node_1_addr]).await?;

    network.isolate(&node_2_addr);
    node_1.tick().await;
    node_2.tick().await;

    let suspect_timeout = SwimConfig::default().suspect_timeout;
    tokio::time::sleep(suspect_timeout + Duration::from_secs(1)).await;
    assert_eq!(
        status_of(&node_1, &node_2_addr).map(|s| s.0),
        Some(MemberStatus::Faulty)
    );
    assert_eq!(
        status_of(&node_2, &node_1_addr).map(|s| s.0),
        Some(MemberStatus::Faulty)
    );

    // Both sides are healthy again but consider each other faulty.
    network.reconnect(&node_2_addr);
    assert!(node_1.heal().await.contains(&node_2_addr));

    assert_eq!(
        status_of(&node_1, &node_2_addr).map(|s| s.0),
        Some(MemberStatus::Alive)
    );
    assert_eq!(
        status_of(&node_2, &node_1_addr).map(|s| s.0),
        Some(MemberStatus::Alive)
    );
    assert_eq!(node_1.checksum(), node_2.checksum());
    assert_eq!(node_1.statistics().heal_attempts(), 1);
    assert!(node_1.heal().await.is_empty());

    Ok(())
}
