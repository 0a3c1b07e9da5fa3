//! Network substrate abstraction
//!
//! The protocol layer never touches sockets directly. It opens protocol-tagged
//! byte streams to peer IDs and registers handlers for inbound streams through
//! this trait, so the same chat and file-transfer code runs over TCP or over
//! the in-memory network used in tests.

use crate::network::peer::{PeerError, PeerId, PeerRecord};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Owned, type-erased stream handed out by a substrate
pub type BoxedStream = Box<dyn AsyncStream>;

/// A stream accepted from a remote peer
pub struct InboundStream {
    /// Peer that opened the stream
    pub remote: PeerId,
    /// Protocol the stream was tagged with
    pub protocol: String,
    pub io: BoxedStream,
}

impl fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundStream")
            .field("remote", &self.remote)
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Callback invoked for each inbound stream of a registered protocol.
///
/// Handlers must not block: they are expected to spawn a task per stream.
pub type StreamHandler = Arc<dyn Fn(InboundStream) + Send + Sync>;

/// Host, transport and address book for a single local peer
#[async_trait]
pub trait Substrate: Send + Sync + 'static {
    /// Our own peer ID
    fn local_id(&self) -> PeerId;

    /// Addresses other peers can use to reach us
    fn listen_addresses(&self) -> Vec<String>;

    /// Parse an operator-supplied address into a peer record
    fn parse_address(&self, addr: &str) -> Result<PeerRecord, PeerError>;

    /// Establish reachability of a peer and remember its addresses
    async fn connect(&self, peer: &PeerRecord) -> Result<(), PeerError>;

    /// Open an outbound stream to `peer` tagged with `protocol`
    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxedStream, PeerError>;

    /// Route inbound streams tagged with `protocol` to `handler`
    async fn set_stream_handler(&self, protocol: &str, handler: StreamHandler);

    async fn remove_stream_handler(&self, protocol: &str);

    /// Drop any addresses or connections held for `peer`
    async fn forget(&self, _peer: &PeerId) {}
}
