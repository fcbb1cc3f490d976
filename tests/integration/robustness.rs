//! Integration test: misbehaving clients and startup conflicts.
//!
//! A bad or stalled connection must never affect other connections, and a
//! busy port at startup is skipped rather than fatal.

use std::time::Duration;

use ndfs_integration_tests::{TestNode, test_data, write_chain};
use ndfs_net::protocol;
use ndfs_types::{Block, PeerAddress};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn connect(peer: &PeerAddress) -> TcpStream {
    TcpStream::connect(peer.endpoint()).await.unwrap()
}

/// Read until the node closes the connection; returns what it sent.
async fn drain(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    // A reset is as good as a close here.
    let _ = tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut out))
        .await
        .expect("node kept a malformed connection open");
    out
}

#[tokio::test]
async fn test_unknown_opcode_aborts_only_that_connection() {
    let node = TestNode::start().await;

    let mut bad = connect(&node.address).await;
    bad.write_all(&[99u8, 1, 2, 3]).await.unwrap();
    assert!(drain(&mut bad).await.is_empty());

    let data = test_data(4096);
    node.write(1, &data).await;
    assert_eq!(node.read(1).await.unwrap(), data);
}

#[tokio::test]
async fn test_zero_target_count_is_rejected() {
    let node = TestNode::start().await;

    for count in [0i32, -1, 10_000] {
        let mut bad = connect(&node.address).await;
        bad.write_u8(80).await.unwrap();
        protocol::write_block(&mut bad, &Block::new(2, 10))
            .await
            .unwrap();
        bad.write_i32(count).await.unwrap();
        bad.flush().await.unwrap();
        assert!(drain(&mut bad).await.is_empty(), "count {count} got a reply");
    }

    assert!(node.read(2).await.is_none());
    node.write(2, b"fine").await;
    assert_eq!(node.read(2).await.unwrap(), b"fine");
}

#[tokio::test]
async fn test_negative_length_is_rejected() {
    let node = TestNode::start().await;

    let mut bad = connect(&node.address).await;
    bad.write_u8(80).await.unwrap();
    protocol::write_block(&mut bad, &Block::new(3, 10))
        .await
        .unwrap();
    bad.write_i32(1).await.unwrap();
    protocol::write_peer(&mut bad, &node.address).await.unwrap();
    bad.write_u8(0).await.unwrap();
    bad.write_i64(-10).await.unwrap();
    assert!(drain(&mut bad).await.is_empty());
    assert!(node.read(3).await.is_none());
}

/// A sender that dies mid-block leaves nothing behind, readable or on disk,
/// and the id can be written again afterwards.
#[tokio::test]
async fn test_abandoned_write_is_discarded() {
    let node = TestNode::start().await;

    let mut partial = connect(&node.address).await;
    partial.write_u8(80).await.unwrap();
    protocol::write_block(&mut partial, &Block::new(4, 1000))
        .await
        .unwrap();
    partial.write_i32(1).await.unwrap();
    protocol::write_peer(&mut partial, &node.address).await.unwrap();
    partial.write_u8(0).await.unwrap();
    partial.write_i64(1000).await.unwrap();
    partial.write_all(&[1u8; 300]).await.unwrap();
    drop(partial);

    // The handler notices the close asynchronously; rewriting succeeds once it has.
    let data = test_data(1000);
    let mut attempts = 0;
    loop {
        let result = ndfs_net::client::write_block(
            std::slice::from_ref(&node.address),
            ndfs_types::BlockId::new(4),
            &data,
            ndfs_types::Encoding::RunLength,
            0,
        )
        .await;
        if result.is_ok() {
            break;
        }
        attempts += 1;
        assert!(attempts < 100, "block 4 stayed busy: {result:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(node.read(4).await.unwrap(), data);
    // The abandoned partial file was unlinked when its writer was dropped.
    assert!(node.tmp_files().is_empty());
}

/// A client that connects and never sends anything does not hold up others.
#[tokio::test]
async fn test_stalled_client_does_not_block_others() {
    let node = TestNode::start().await;
    let _stalled: Vec<TcpStream> = {
        let mut v = Vec::new();
        for _ in 0..5 {
            v.push(connect(&node.address).await);
        }
        v
    };

    let data = test_data(10_000);
    tokio::time::timeout(Duration::from_secs(10), async {
        write_chain(std::slice::from_ref(&node.address), 5, &data).await;
        assert_eq!(node.read(5).await.unwrap(), data);
    })
    .await
    .expect("stalled clients blocked the node");
}

/// A reader that hangs up mid-stream does not disturb the node.
#[tokio::test]
async fn test_reader_disconnect_mid_stream() {
    let node = TestNode::start().await;
    let data = test_data(2_000_000);
    node.write(6, &data).await;

    let mut reader = connect(&node.address).await;
    reader.write_u8(81).await.unwrap();
    protocol::write_block(&mut reader, &Block::new(6, 0))
        .await
        .unwrap();
    assert_eq!(reader.read_i64().await.unwrap(), 2_000_000);
    let mut some = [0u8; 100];
    reader.read_exact(&mut some).await.unwrap();
    drop(reader);

    assert_eq!(node.read(6).await.unwrap(), data);
}

/// Startup skips a port that is already taken.
#[tokio::test]
async fn test_busy_port_is_skipped() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = blocker.local_addr().unwrap().port();
    if taken > u16::MAX - 20 {
        return;
    }

    let node = TestNode::start_with(|c| {
        c.listen_port = taken;
        c.port_search = 20;
    })
    .await;

    assert_ne!(node.address.port, taken);
    assert!(node.address.port > taken);
    node.write(1, b"moved").await;
    assert_eq!(node.read(1).await.unwrap(), b"moved");
}
