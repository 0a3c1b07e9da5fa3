//! P2P Networking module
//!
//! Provides peer-to-peer text messaging and file transfer.
//!
//! # Features
//! - Pluggable stream substrate (TCP, in-memory for tests)
//! - One-stream-per-message text protocol with optional encryption
//! - Chunked file transfer
//! - LAN peer discovery
//! - Bounded, ordered inbound event channel

pub mod chat;
pub mod discovery;
pub mod memory;
pub mod message;
pub mod node;
pub mod peer;
pub mod substrate;
pub mod tcp;
pub mod transfer;

pub use chat::{ChatError, MAX_MESSAGE_SIZE};
pub use discovery::{DiscoveryConfig, LanDiscovery, PeerFoundCallback, DISCOVERY_PORT};
pub use memory::{MemoryHost, MemoryNetwork};
pub use message::{
    InboundEvent, MessageReceiver, MessageSender, CHAT_PROTOCOL, DEFAULT_CHANNEL_CAPACITY,
    FILE_PROTOCOL,
};
pub use node::{Node, NodeConfig, NodeStatus};
pub use peer::{PeerError, PeerId, PeerRecord, PeerRegistry};
pub use substrate::{BoxedStream, InboundStream, StreamHandler, Substrate};
pub use tcp::TcpHost;
pub use transfer::{ReceivedFile, TransferError, CHUNK_SIZE};
