//! Integration test: write/read.
//!
//! Single nodes. Write blocks with both encodings, read them back whole and
//! with skips, and check what reaches the block report.

use ndfs_integration_tests::{TestNode, eventually, test_data, test_data_seeded};
use ndfs_net::client;
use ndfs_store::BlockStore;
use ndfs_types::{Block, BlockId, Encoding};

/// Block 42, 5000 bytes, run-length, no mirrors: read returns the same bytes
/// and the next block report lists it.
#[tokio::test]
async fn test_write_42_read_back_and_report() {
    let node = TestNode::start_with(|c| {
        c.control.block_report_interval = std::time::Duration::from_millis(100);
    })
    .await;
    let data = test_data(5000);

    node.write(42, &data).await;
    assert_eq!(node.read(42).await.unwrap(), data);

    let coordinator = &node.coordinator;
    eventually("block 42 in a block report", || async move {
        coordinator
            .last_report()
            .is_some_and(|blocks| blocks.contains(&Block::new(42, 5000)))
    })
    .await;
}

/// Blocks of many sizes survive a round trip byte for byte.
#[tokio::test]
async fn test_varying_sizes_round_trip() {
    let node = TestNode::start().await;
    let sizes = [0usize, 1, 4095, 4096, 4097, 65_536, 300_001];

    for (i, size) in sizes.iter().enumerate() {
        let data = test_data_seeded(*size, i as u32 + 1);
        node.write(i as i64, &data).await;
        assert_eq!(
            node.read(i as i64).await.unwrap(),
            data,
            "block {i} ({size} bytes) mismatch"
        );
    }
}

#[tokio::test]
async fn test_chunked_write_round_trip() {
    let node = TestNode::start().await;
    let data = test_data(100_000);

    client::write_block(
        std::slice::from_ref(&node.address),
        BlockId::new(77),
        &data,
        Encoding::Chunked,
        3333,
    )
    .await
    .unwrap();

    assert_eq!(node.read(77).await.unwrap(), data);
    assert_eq!(node.store.length(BlockId::new(77)).await.unwrap(), 100_000);
}

/// Block of 500 bytes: skip 100 returns 400 bytes, skip 600 is capped at 500.
#[tokio::test]
async fn test_skip_correctness() {
    let node = TestNode::start().await;
    let data = test_data(500);
    node.write(5, &data).await;

    let r = node.read_skip(5, Some(100)).await.unwrap();
    assert_eq!(r.len, 500);
    assert_eq!(r.skipped, 100);
    assert_eq!(r.data, &data[100..]);

    let r = node.read_skip(5, Some(600)).await.unwrap();
    assert_eq!(r.len, 500);
    assert_eq!(r.skipped, 500);
    assert!(r.data.is_empty());

    let r = node.read_skip(5, Some(0)).await.unwrap();
    assert_eq!(r.skipped, 0);
    assert_eq!(r.data, data);
}

#[tokio::test]
async fn test_unknown_block_reads_invalid() {
    let node = TestNode::start().await;
    assert!(node.read(12345).await.is_none());
    assert!(node.read_skip(12345, Some(5)).await.is_none());
}

/// An open block is invisible to readers until finalized.
#[tokio::test]
async fn test_finalization_gate() {
    let node = TestNode::start().await;
    let mut writer = node.store.create(BlockId::new(8)).await.unwrap();
    writer.append(&test_data(1000)).await.unwrap();

    assert!(node.read(8).await.is_none());
    assert!(!node.store.is_valid(BlockId::new(8)).await);

    writer.finalize().await.unwrap();
    assert_eq!(node.read(8).await.unwrap().len(), 1000);
}

/// Writing an id that is already finalized fails and leaves the original intact.
#[tokio::test]
async fn test_duplicate_write_is_refused() {
    let node = TestNode::start().await;
    let original = test_data_seeded(2000, 1);
    node.write(3, &original).await;

    let result = client::write_block(
        std::slice::from_ref(&node.address),
        BlockId::new(3),
        &test_data_seeded(2000, 2),
        Encoding::RunLength,
        0,
    )
    .await;
    assert!(result.is_err());
    assert_eq!(node.read(3).await.unwrap(), original);
}

/// Finalized blocks survive a restart; the first report of the new process lists them.
#[tokio::test]
async fn test_blocks_survive_restart() {
    let node = TestNode::start().await;
    let data = test_data(9000);
    node.write(1, &data).await;

    let node = node.restart().await;
    assert_eq!(node.read(1).await.unwrap(), data);
    let coordinator = &node.coordinator;
    eventually("restarted node's block report", || async move {
        coordinator.last_report() == Some(vec![Block::new(1, 9000)])
    })
    .await;
}

/// Many concurrent writers of distinct blocks do not interfere.
#[tokio::test]
async fn test_concurrent_writes() {
    let node = TestNode::start().await;
    let mut handles = Vec::new();
    for i in 0..20 {
        let address = node.address.clone();
        handles.push(tokio::spawn(async move {
            let data = test_data_seeded(10_000 + i * 100, i as u32 + 10);
            client::write_block(&[address], BlockId::new(i as i64), &data, Encoding::RunLength, 0)
                .await
                .unwrap();
            data
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let data = handle.await.unwrap();
        assert_eq!(node.read(i as i64).await.unwrap(), data);
    }
}
