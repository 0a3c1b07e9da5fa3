//! In-process substrate
//!
//! Hosts attached to the same [`MemoryNetwork`] reach each other through
//! `tokio::io::duplex` pipes. Used by the test suite and for local demos.

use crate::network::peer::{PeerError, PeerId, PeerRecord};
use crate::network::substrate::{BoxedStream, InboundStream, StreamHandler, Substrate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

/// Buffer size of each in-memory pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Address prefix understood by [`MemoryHost::parse_address`]
pub const MEMORY_ADDR_PREFIX: &str = "/memory/";

/// A set of in-memory hosts that can open streams to each other
#[derive(Default)]
pub struct MemoryNetwork {
    hosts: RwLock<HashMap<PeerId, Arc<MemoryHost>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new host with a random peer ID
    pub async fn host(self: &Arc<Self>) -> Arc<MemoryHost> {
        let host = Arc::new(MemoryHost {
            id: PeerId::random(),
            network: Arc::downgrade(self),
            handlers: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
        });

        let mut hosts = self.hosts.write().await;
        hosts.insert(host.id, host.clone());
        host
    }

    async fn lookup(&self, id: &PeerId) -> Result<Arc<MemoryHost>, PeerError> {
        let hosts = self.hosts.read().await;
        match hosts.get(id) {
            Some(host) if host.is_online() => Ok(host.clone()),
            Some(_) => Err(PeerError::ConnectionFailed(format!("{} is offline", id))),
            None => Err(PeerError::ConnectionFailed(format!("{} is unreachable", id))),
        }
    }
}

/// One peer on a [`MemoryNetwork`]
pub struct MemoryHost {
    id: PeerId,
    network: Weak<MemoryNetwork>,
    handlers: RwLock<HashMap<String, StreamHandler>>,
    online: AtomicBool,
}

impl MemoryHost {
    /// Simulate the host going away (or coming back)
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn address(&self) -> String {
        format!("{}{}", MEMORY_ADDR_PREFIX, self.id)
    }

    fn network(&self) -> Result<Arc<MemoryNetwork>, PeerError> {
        self.network
            .upgrade()
            .ok_or_else(|| PeerError::ConnectionFailed("network shut down".to_string()))
    }
}

#[async_trait]
impl Substrate for MemoryHost {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn listen_addresses(&self) -> Vec<String> {
        vec![self.address()]
    }

    fn parse_address(&self, addr: &str) -> Result<PeerRecord, PeerError> {
        let id = addr
            .trim()
            .strip_prefix(MEMORY_ADDR_PREFIX)
            .ok_or_else(|| {
                PeerError::InvalidAddress(format!("{}: expected /memory/<peer-id>", addr))
            })?;
        Ok(PeerRecord::new(id.parse()?, Vec::new()))
    }

    async fn connect(&self, peer: &PeerRecord) -> Result<(), PeerError> {
        self.network()?.lookup(&peer.id).await?;
        Ok(())
    }

    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxedStream, PeerError> {
        let remote = self.network()?.lookup(peer).await?;

        let handler = {
            let handlers = remote.handlers.read().await;
            handlers.get(protocol).cloned()
        }
        .ok_or_else(|| PeerError::UnsupportedProtocol(protocol.to_string()))?;

        let (local, far) = tokio::io::duplex(PIPE_CAPACITY);
        handler(InboundStream {
            remote: self.id,
            protocol: protocol.to_string(),
            io: Box::new(far),
        });

        Ok(Box::new(local))
    }

    async fn set_stream_handler(&self, protocol: &str, handler: StreamHandler) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(protocol.to_string(), handler);
    }

    async fn remove_stream_handler(&self, protocol: &str) {
        let mut handlers = self.handlers.write().await;
        handlers.remove(protocol);
    }
}
