//! anonbox: anonymous peer-to-peer messaging and file sharing
//!
//! This crate provides:
//! - Random, unlinkable peer identities
//! - Text messages sealed with a pre-shared key (ChaCha20-Poly1305)
//! - Streaming file transfer
//! - LAN discovery and manual peer connects
//! - An ordered, bounded event channel for front-ends
//!
//! # Example
//!
//! ```rust,no_run
//! use anonbox::network::{MemoryNetwork, Node, NodeConfig};
//!
//! # async fn demo() {
//! let network = MemoryNetwork::new();
//! let config = NodeConfig::default().with_password("correct horse");
//!
//! let (alice, _alice_events) = Node::new(config.clone(), network.host().await);
//! let (bob, mut bob_events) = Node::new(config, network.host().await);
//! alice.start().await;
//! bob.start().await;
//!
//! alice.send_message(&bob.local_id(), "hello").await.unwrap();
//! let event = bob_events.recv().await.unwrap();
//! println!("{}: {}", event.sender, event.content);
//! # }
//! ```

pub mod cli;
pub mod crypto;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use crypto::{generate_key, EncryptionKey};
pub use network::{InboundEvent, MessageReceiver, Node, NodeConfig, PeerId, TcpHost};
pub use store::{ChatLog, ChatLogEntry};
