//! Integration test: replica chains.
//!
//! Writes mirrored down chains of real nodes, with hops that are missing or
//! fail mid-stream.

use ndfs_integration_tests::{
    TestNode, dead_peer, eventually, test_data, test_data_seeded, truncating_peer, write_chain,
};
use ndfs_net::client;
use ndfs_types::{Block, BlockId, Encoding};

#[tokio::test]
async fn test_three_node_chain_all_healthy() {
    let nodes = [
        TestNode::start().await,
        TestNode::start().await,
        TestNode::start().await,
    ];
    let chain: Vec<_> = nodes.iter().map(|n| n.address.clone()).collect();
    let data = test_data(250_000);

    write_chain(&chain, 1, &data).await;

    for (i, node) in nodes.iter().enumerate() {
        assert_eq!(node.read(1).await.unwrap(), data, "replica {i} differs");
    }
}

#[tokio::test]
async fn test_chunked_chain() {
    let nodes = [TestNode::start().await, TestNode::start().await];
    let chain: Vec<_> = nodes.iter().map(|n| n.address.clone()).collect();
    let data = test_data_seeded(40_000, 9);

    client::write_block(&chain, BlockId::new(2), &data, Encoding::Chunked, 999)
        .await
        .unwrap();

    for node in &nodes {
        assert_eq!(node.read(2).await.unwrap(), data);
    }
}

/// The last hop reads part of the stream and hangs up: the client still
/// succeeds and the first two hops hold identical bytes.
#[tokio::test]
async fn test_mirror_fidelity_when_last_hop_fails() {
    let a = TestNode::start().await;
    let b = TestNode::start().await;
    let (c, c_task) = truncating_peer(10_000).await;
    let data = test_data(500_000);

    write_chain(&[a.address.clone(), b.address.clone(), c], 3, &data).await;

    assert_eq!(a.read(3).await.unwrap(), data);
    assert_eq!(b.read(3).await.unwrap(), data);
    assert!(c_task.await.unwrap() <= 10_000);
}

/// A middle hop that is unreachable cuts the chain there without failing the write.
#[tokio::test]
async fn test_unreachable_hop_cuts_chain() {
    let a = TestNode::start().await;
    let c = TestNode::start().await;
    let data = test_data(20_000);

    write_chain(&[a.address.clone(), dead_peer().await, c.address.clone()], 4, &data).await;

    assert_eq!(a.read(4).await.unwrap(), data);
    assert!(c.read(4).await.is_none());
}

/// Every hop reports the block to its own coordinator, exactly once.
#[tokio::test]
async fn test_every_replica_reports_received_block() {
    let nodes = [TestNode::start().await, TestNode::start().await];
    let chain: Vec<_> = nodes.iter().map(|n| n.address.clone()).collect();
    write_chain(&chain, 5, &test_data(1234)).await;

    for node in &nodes {
        let coordinator = &node.coordinator;
        eventually("blockReceived for block 5", || async move {
            coordinator.received().contains(&Block::new(5, 1234))
        })
        .await;
    }
    // Give the loops a few more cycles to prove nothing is reported twice.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    for node in &nodes {
        assert_eq!(node.coordinator.received(), vec![Block::new(5, 1234)]);
    }
}
