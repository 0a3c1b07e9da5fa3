//! End-to-end file transfer between nodes

use anonbox::network::{MemoryNetwork, Node, NodeConfig, Substrate, FILE_PROTOCOL};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;

fn config_with_downloads(dir: &TempDir) -> NodeConfig {
    NodeConfig {
        download_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn test_file_arrives_intact() {
    let network = MemoryNetwork::new();
    let source = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();

    let (alice, _) = Node::new(NodeConfig::default(), network.host().await);
    let (bob, mut bob_rx) = Node::new(config_with_downloads(&downloads), network.host().await);
    bob.start().await;

    let content: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let path = source.path().join("photo.bin");
    std::fs::write(&path, &content).unwrap();

    let sent = alice.send_file(&bob.local_id(), &path).await.unwrap();
    assert_eq!(sent, content.len() as u64);

    let event = bob_rx.recv().await.unwrap();
    assert!(event.is_file);
    assert_eq!(event.content, "Received file: photo.bin");
    assert_eq!(event.sender, alice.local_id().to_string());

    let received = std::fs::read(downloads.path().join("photo.bin")).unwrap();
    assert_eq!(received, content);
}

#[tokio::test]
async fn test_empty_file() {
    let network = MemoryNetwork::new();
    let source = TempDir::new().unwrap();
    let downloads = TempDir::new().unwrap();

    let (alice, _) = Node::new(NodeConfig::default(), network.host().await);
    let (bob, mut bob_rx) = Node::new(config_with_downloads(&downloads), network.host().await);
    bob.start().await;

    let path = source.path().join("empty.txt");
    std::fs::write(&path, b"").unwrap();

    assert_eq!(alice.send_file(&bob.local_id(), &path).await.unwrap(), 0);
    assert!(bob_rx.recv().await.unwrap().is_file);
    assert_eq!(std::fs::read(downloads.path().join("empty.txt")).unwrap().len(), 0);
}

#[tokio::test]
async fn test_short_body_produces_no_event() {
    let network = MemoryNetwork::new();
    let downloads = TempDir::new().unwrap();

    let alice = network.host().await;
    let (bob, mut bob_rx) = Node::new(config_with_downloads(&downloads), network.host().await);
    bob.start().await;

    // Header promises 100 bytes, sender closes after 10
    let mut frame = Vec::new();
    frame.extend_from_slice(&5i32.to_le_bytes());
    frame.extend_from_slice(b"x.bin");
    frame.extend_from_slice(&100i64.to_le_bytes());
    frame.extend_from_slice(&[7u8; 10]);

    let mut stream = alice.open_stream(&bob.local_id(), FILE_PROTOCOL).await.unwrap();
    stream.write_all(&frame).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    let event = tokio::time::timeout(Duration::from_millis(300), bob_rx.recv()).await;
    assert!(event.is_err(), "truncated transfer was reported as complete");
}

#[tokio::test]
async fn test_file_to_unknown_peer_fails() {
    let network = MemoryNetwork::new();
    let source = TempDir::new().unwrap();
    let (alice, _) = Node::new(NodeConfig::default(), network.host().await);

    let path = source.path().join("a.txt");
    std::fs::write(&path, b"abc").unwrap();

    let stranger = anonbox::PeerId::random();
    assert!(alice.send_file(&stranger, &path).await.is_err());
}
