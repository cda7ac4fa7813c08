use std::collections::BTreeMap;
use std::time::Duration;

use swimring_node::{
    JoinError,
    MemberStatus,
    NodeError,
    SwimConfig,
    SwimNode,
    SwimNodeBuilder,
};
use test_helper::{get_unused_addr, make_addr, LocalNetwork};

async fn start_node(
    network: &LocalNetwork,
    addr: &str,
    seeds: &[&str],
    config: SwimConfig,
) -> Result<SwimNode, NodeError> {
    SwimNodeBuilder::new(addr, config)
        .with_seeds(seeds.to_vec())
        .with_autostart(false)
        .connect(network.transport(addr))
        .await
}

#[tokio::test(start_paused = true)]
async fn test_member_join() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let node_1_addr = get_unused_addr();
    let node_2_addr = get_unused_addr();
    let node_3_addr = get_unused_addr();

    let node_1 =
        start_node(&network, &node_1_addr, &[&node_1_addr], SwimConfig::default()).await?;
    assert_eq!(node_1.members().len(), 1);

    let node_2 =
        start_node(&network, &node_2_addr, &[&node_1_addr], SwimConfig::default()).await?;
    let node_3 = start_node(
        &network,
        &node_3_addr,
        &[&node_1_addr, &node_2_addr],
        SwimConfig::default(),
    )
    .await?;

    for node in [&node_1, &node_2, &node_3] {
        node.wait_for_members(|members| members.len() == 3, Duration::from_secs(5))
            .await?;

        let stats = node.statistics();
        assert_eq!(stats.num_alive_members(), 3);
        assert_eq!(stats.num_dead_members(), 0);
    }

    assert_eq!(node_1.checksum(), node_2.checksum());
    assert_eq!(node_2.checksum(), node_3.checksum());
    assert_eq!(node_1.ring_checksum(), node_3.ring_checksum());
    assert_eq!(node_1.lookup("my-key"), node_2.lookup("my-key"));
    assert_eq!(node_1.handle().ring_servers().len(), 3);

    node_1.shutdown().await;
    node_2.shutdown().await;
    node_3.shutdown().await;

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_join_rejections() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let seed_addr = get_unused_addr();
    let seed = start_node(
        &network,
        &seed_addr,
        &[&seed_addr],
        SwimConfig::default().with_blacklisted("127.0.0.2:*"),
    )
    .await?;

    let blacklisted_addr = make_addr("127.0.0.2");
    let err = start_node(
        &network,
        &blacklisted_addr,
        &[&seed_addr],
        SwimConfig::default().with_join_limits(Duration::from_secs(3), 50),
    )
    .await
    .err()
    .expect("Blacklisted node should not be able to join");
    assert!(matches!(
        err,
        NodeError::Join(JoinError::DurationExceeded { joined: 0, .. })
    ));
    assert!(!network.is_listening(&blacklisted_addr));
    assert!(seed.find_member(&blacklisted_addr).is_none());

    let other_app_addr = get_unused_addr();
    let err = start_node(
        &network,
        &other_app_addr,
        &[&seed_addr],
        SwimConfig::default()
            .with_app("other-app")
            .with_join_limits(Duration::from_secs(60), 2),
    )
    .await
    .err()
    .expect("Node of another app should not be able to join");
    assert_eq!(err.kind(), "join-attempts-exceeded");

    let err = start_node(&network, &get_unused_addr(), &[], SwimConfig::default())
        .await
        .err()
        .expect("Node without seeds should not start");
    assert!(matches!(err, NodeError::Join(JoinError::NoSeeds)));

    seed.deny_joins();
    let denied_addr = get_unused_addr();
    let err = start_node(
        &network,
        &denied_addr,
        &[&seed_addr],
        SwimConfig::default().with_join_limits(Duration::from_secs(60), 1),
    )
    .await
    .err()
    .expect("Joins should be denied");
    assert_eq!(err.kind(), "join-attempts-exceeded");

    seed.allow_joins();
    let node = start_node(&network, &denied_addr, &[&seed_addr], SwimConfig::default()).await?;
    assert_eq!(node.members().len(), 2);
    assert_eq!(seed.members().len(), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_member_leave() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let node_1_addr = get_unused_addr();
    let node_2_addr = get_unused_addr();
    let node_3_addr = get_unused_addr();

    let node_1 =
        start_node(&network, &node_1_addr, &[&node_1_addr], SwimConfig::default()).await?;
    let node_2 =
        start_node(&network, &node_2_addr, &[&node_1_addr], SwimConfig::default()).await?;
    let node_3 =
        start_node(&network, &node_3_addr, &[&node_1_addr], SwimConfig::default()).await?;

    node_3.leave().await;
    assert_eq!(node_3.me().status, MemberStatus::Leave);

    for node in [&node_1, &node_2] {
        node.wait_for_members(
            |members| {
                members
                    .iter()
                    .any(|m| m.address == node_3_addr && m.status == MemberStatus::Leave)
            },
            Duration::from_secs(5),
        )
        .await?;
        assert!(!node.handle().ring_servers().contains(&node_3_addr));
        assert_eq!(node.statistics().num_members(MemberStatus::Leave), 1);
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_labels_are_disseminated() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let network = LocalNetwork::default();
    let node_1_addr = get_unused_addr();
    let node_2_addr = get_unused_addr();

    let node_1 =
        start_node(&network, &node_1_addr, &[&node_1_addr], SwimConfig::default()).await?;
    let node_2 =
        start_node(&network, &node_2_addr, &[&node_1_addr], SwimConfig::default()).await?;

    let before = node_1.me().incarnation_number;
    node_1.set_labels(BTreeMap::from([("zone".to_string(), "eu-1".to_string())]));
    assert!(node_1.me().incarnation_number > before);

    node_1.ping(&node_2_addr).await?;

    let member = node_2
        .find_member(&node_1_addr)
        .expect("Node 1 should be known");
    assert_eq!(member.labels.get("zone").map(String::as_str), Some("eu-1"));
    assert_eq!(node_1.checksum(), node_2.checksum());

    Ok(())
}
