//! P2P Node implementation
//!
//! The node owns the peer registry, the active encryption key and the
//! producer side of the event channel, and exposes the operations front-ends
//! call: list peers, connect, send text, send files, broadcast.

use crate::crypto::EncryptionKey;
use crate::network::chat::{self, ChatError};
use crate::network::discovery::PeerFoundCallback;
use crate::network::message::{
    self, MessageReceiver, MessageSender, CHAT_PROTOCOL, DEFAULT_CHANNEL_CAPACITY, FILE_PROTOCOL,
};
use crate::network::peer::{PeerError, PeerId, PeerRecord, PeerRegistry};
use crate::network::substrate::Substrate;
use crate::network::transfer::{self, TransferError};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// P2P Node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Port to listen on (0 picks a random port)
    pub port: u16,
    /// Peers to connect to on start
    pub bootstrap_peers: Vec<String>,
    /// Where received files are written
    pub download_dir: PathBuf,
    /// Capacity of the inbound event channel
    pub channel_capacity: usize,
    /// Whether to run LAN discovery
    pub discovery: bool,
    /// Pre-shared key; `None` sends messages in the clear
    pub key: Option<EncryptionKey>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bootstrap_peers: Vec::new(),
            download_dir: PathBuf::from("."),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            discovery: true,
            key: None,
        }
    }
}

impl NodeConfig {
    /// Derive the key from a password; the empty password clears it
    pub fn with_password(mut self, password: &str) -> Self {
        self.key = EncryptionKey::from_password(password);
        self
    }
}

/// The main P2P node
pub struct Node {
    config: NodeConfig,
    substrate: Arc<dyn Substrate>,
    registry: Arc<PeerRegistry>,
    events: MessageSender,
}

impl Node {
    /// Create a node on top of `substrate`.
    ///
    /// The key is fixed here, before `start` registers any stream handler.
    /// The returned receiver is the single consumer of inbound events.
    pub fn new(config: NodeConfig, substrate: Arc<dyn Substrate>) -> (Self, MessageReceiver) {
        let (events, receiver) = message::channel(config.channel_capacity);
        let registry = Arc::new(PeerRegistry::new(substrate.clone()));

        let node = Self {
            config,
            substrate,
            registry,
            events,
        };
        (node, receiver)
    }

    /// Register protocol handlers and connect to bootstrap peers
    pub async fn start(&self) {
        self.substrate
            .set_stream_handler(
                CHAT_PROTOCOL,
                chat::handler(self.config.key.clone(), self.events.clone()),
            )
            .await;
        self.substrate
            .set_stream_handler(
                FILE_PROTOCOL,
                transfer::handler(self.config.download_dir.clone(), self.events.clone()),
            )
            .await;

        log::info!(
            "Node started. ID: {}, Addrs: {:?}, encrypted: {}",
            self.local_id(),
            self.substrate.listen_addresses(),
            self.is_encrypted()
        );

        for addr in &self.config.bootstrap_peers {
            if let Err(e) = self.connect(addr).await {
                log::warn!("Failed to connect to bootstrap peer {}: {}", addr, e);
            }
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.substrate.local_id()
    }

    pub fn listen_addresses(&self) -> Vec<String> {
        self.substrate.listen_addresses()
    }

    pub fn is_encrypted(&self) -> bool {
        self.config.key.is_some()
    }

    pub fn registry(&self) -> Arc<PeerRegistry> {
        self.registry.clone()
    }

    /// Snapshot of known peers
    pub async fn peers(&self) -> Vec<PeerId> {
        self.registry.list().await
    }

    /// Intake for a peer reported by discovery
    pub async fn handle_peer_found(&self, record: PeerRecord) -> bool {
        self.registry.record_discovered(record).await
    }

    /// Callback for [`LanDiscovery`](crate::network::discovery::LanDiscovery)
    pub fn discovery_callback(&self) -> PeerFoundCallback {
        let registry = self.registry.clone();
        Arc::new(move |record: PeerRecord| {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry.record_discovered(record).await;
            });
        })
    }

    /// Connect to a peer by address
    pub async fn connect(&self, addr: &str) -> Result<PeerId, PeerError> {
        log::info!("Connecting to peer: {}", addr);
        self.registry.record_manual(addr).await
    }

    /// Forget a peer. Returns whether it was known.
    pub async fn disconnect(&self, peer: &PeerId) -> bool {
        let removed = self.registry.remove(peer).await.is_some();
        self.substrate.forget(peer).await;
        removed
    }

    /// Send a text message to one peer
    pub async fn send_message(&self, peer: &PeerId, text: &str) -> Result<(), ChatError> {
        chat::send_message(self.substrate.as_ref(), peer, text, self.config.key.as_ref()).await
    }

    /// Send a file to one peer
    pub async fn send_file(&self, peer: &PeerId, path: &Path) -> Result<u64, TransferError> {
        transfer::send_file(self.substrate.as_ref(), peer, path).await
    }

    /// Send a text message to every known peer concurrently.
    ///
    /// Each send is independent; one failure does not affect the others.
    pub async fn broadcast(&self, text: &str) -> Vec<(PeerId, Result<(), ChatError>)> {
        let peers = self.registry.list().await;

        let sends = peers.into_iter().map(|peer| {
            let substrate = self.substrate.clone();
            let key = self.config.key.clone();
            let text = text.to_string();
            async move {
                let result = tokio::spawn(async move {
                    chat::send_message(substrate.as_ref(), &peer, &text, key.as_ref()).await
                })
                .await
                .unwrap_or_else(|e| {
                    Err(ChatError::IoError(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        e.to_string(),
                    )))
                });
                (peer, result)
            }
        });

        futures::future::join_all(sends).await
    }

    /// Get node status
    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            peer_id: self.local_id(),
            addresses: self.listen_addresses(),
            peers: self.registry.len().await,
            encrypted: self.is_encrypted(),
            key_fingerprint: self.config.key.as_ref().map(EncryptionKey::fingerprint),
            download_dir: self.config.download_dir.clone(),
        }
    }

    /// Stop accepting streams. The event channel closes once this node is
    /// dropped and in-flight handlers finish.
    pub async fn shutdown(self) {
        log::info!("Node shutting down...");
        self.substrate.remove_stream_handler(CHAT_PROTOCOL).await;
        self.substrate.remove_stream_handler(FILE_PROTOCOL).await;
    }
}

/// Node status information
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub peer_id: PeerId,
    pub addresses: Vec<String>,
    pub peers: usize,
    pub encrypted: bool,
    /// Fingerprint of the active key, if any
    pub key_fingerprint: Option<String>,
    pub download_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryNetwork;
    use std::time::Duration;

    #[tokio::test]
    async fn test_node_creation() {
        let network = MemoryNetwork::new();
        let host = network.host().await;
        let (node, _rx) = Node::new(NodeConfig::default(), host.clone());

        let status = node.status().await;
        assert_eq!(status.peer_id, host.local_id());
        assert_eq!(status.peers, 0);
        assert!(!status.encrypted);
        assert!(status.key_fingerprint.is_none());
    }

    #[test]
    fn test_config_password() {
        assert!(NodeConfig::default().with_password("pw").key.is_some());
        assert!(NodeConfig::default().with_password("").key.is_none());
    }

    #[tokio::test]
    async fn test_encrypted_message_between_nodes() {
        let network = MemoryNetwork::new();
        let config = NodeConfig::default().with_password("shared secret");

        let (alice, _alice_rx) = Node::new(config.clone(), network.host().await);
        let (bob, mut bob_rx) = Node::new(config, network.host().await);
        alice.start().await;
        bob.start().await;

        alice.send_message(&bob.local_id(), "over the envelope").await.unwrap();

        let event = bob_rx.recv().await.unwrap();
        assert_eq!(event.content, "over the envelope");
        assert_eq!(event.sender, alice.local_id().to_string());
    }

    #[tokio::test]
    async fn test_mismatched_keys_deliver_nothing() {
        let network = MemoryNetwork::new();
        let (alice, _) = Node::new(
            NodeConfig::default().with_password("one"),
            network.host().await,
        );
        let (bob, mut bob_rx) = Node::new(
            NodeConfig::default().with_password("two"),
            network.host().await,
        );
        bob.start().await;

        alice.send_message(&bob.local_id(), "garbled?").await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(200), bob_rx.recv()).await;
        assert!(received.is_err(), "wrong-key message was delivered");
    }

    #[tokio::test]
    async fn test_disconnect_removes_peer() {
        let network = MemoryNetwork::new();
        let (alice, _) = Node::new(NodeConfig::default(), network.host().await);
        let bob_host = network.host().await;

        alice
            .connect(&format!("/memory/{}", bob_host.local_id()))
            .await
            .unwrap();
        assert_eq!(alice.peers().await, vec![bob_host.local_id()]);

        assert!(alice.disconnect(&bob_host.local_id()).await);
        assert!(alice.peers().await.is_empty());
        assert!(!alice.disconnect(&bob_host.local_id()).await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_channel() {
        let network = MemoryNetwork::new();
        let (node, mut rx) = Node::new(NodeConfig::default(), network.host().await);
        node.start().await;
        node.shutdown().await;

        assert!(rx.recv().await.is_none());
    }
}
