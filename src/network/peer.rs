//! Peer identity and the peer registry
//!
//! Handles peer identifiers, address records, and the registry of known
//! peers fed by discovery and manual connects.

use crate::network::substrate::Substrate;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Size of a raw peer identifier in bytes
pub const PEER_ID_LEN: usize = 32;

/// Peer connection errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid peer ID: {0}")]
    InvalidPeerId(String),
    #[error("Refusing to connect to ourselves")]
    SelfConnect,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),
    #[error("No handler for protocol {0}")]
    UnsupportedProtocol(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Process-unique peer identifier, rendered as base58
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    /// Generate a fresh random identifier
    pub fn random() -> Self {
        let mut bytes = [0u8; PEER_ID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_LEN] {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> String {
        let full = self.to_string();
        full.chars().take(8).collect()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| PeerError::InvalidPeerId(format!("{}: {}", s, e)))?;
        let bytes: [u8; PEER_ID_LEN] = bytes
            .try_into()
            .map_err(|_| PeerError::InvalidPeerId(format!("{}: wrong length", s)))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for PeerId {
    type Error = PeerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.to_string()
    }
}

/// A known peer and the addresses it can be reached on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    pub addrs: Vec<SocketAddr>,
}

impl PeerRecord {
    pub fn new(id: PeerId, addrs: Vec<SocketAddr>) -> Self {
        Self { id, addrs }
    }
}

/// Parse `/ip4/<ip>/tcp/<port>/p2p/<id>` (or `/ip6/...`) into a peer record
pub fn parse_tcp_address(addr: &str) -> Result<PeerRecord, PeerError> {
    let invalid = |why: &str| PeerError::InvalidAddress(format!("{}: {}", addr, why));

    let segments: Vec<&str> = addr.trim().split('/').collect();
    // Leading '/' produces an empty first segment
    let [empty, family, ip, tcp, port, p2p, id] = segments.as_slice() else {
        return Err(invalid("expected /ip4/<ip>/tcp/<port>/p2p/<peer-id>"));
    };
    if !empty.is_empty() || *tcp != "tcp" || *p2p != "p2p" {
        return Err(invalid("expected /ip4/<ip>/tcp/<port>/p2p/<peer-id>"));
    }

    let ip: IpAddr = match *family {
        "ip4" | "ip6" => ip.parse().map_err(|_| invalid("bad IP address"))?,
        _ => return Err(invalid("unsupported address family")),
    };
    if (*family == "ip4") != ip.is_ipv4() {
        return Err(invalid("address family does not match IP"));
    }

    let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;
    let id: PeerId = id.parse()?;

    Ok(PeerRecord::new(id, vec![SocketAddr::new(ip, port)]))
}

/// Format a socket address and peer ID as a shareable address string
pub fn format_tcp_address(addr: &SocketAddr, id: &PeerId) -> String {
    let family = if addr.is_ipv4() { "ip4" } else { "ip6" };
    format!("/{}/{}/tcp/{}/p2p/{}", family, addr.ip(), addr.port(), id)
}

/// Registry of known peers
///
/// Discovery and manual connects feed it; front-ends read snapshots of it.
/// The lock is only held for the map access itself, never across a connect.
pub struct PeerRegistry {
    local_id: PeerId,
    substrate: Arc<dyn Substrate>,
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self {
            local_id: substrate.local_id(),
            substrate,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Record a peer reported by discovery.
    ///
    /// Known peers and our own ID are ignored. A new peer is inserted and a
    /// connect attempt is spawned; a failed attempt leaves the record in place.
    /// Returns whether the peer was inserted.
    pub async fn record_discovered(&self, record: PeerRecord) -> bool {
        if record.id == self.local_id {
            return false;
        }

        {
            let mut peers = self.peers.write().await;
            if peers.contains_key(&record.id) {
                return false;
            }
            peers.insert(record.id, record.clone());
        }

        log::info!("Found peer: {}", record.id);

        let substrate = self.substrate.clone();
        tokio::spawn(async move {
            match substrate.connect(&record).await {
                Ok(()) => log::info!("Connected to peer: {}", record.id),
                Err(e) => log::warn!("Failed to connect to peer {}: {}", record.id, e),
            }
        });

        true
    }

    /// Record a peer from an operator-supplied address and connect to it.
    ///
    /// Overwrites any existing record for the same ID. The connect error, if
    /// any, is returned; the record stays either way.
    pub async fn record_manual(&self, addr: &str) -> Result<PeerId, PeerError> {
        let record = self.substrate.parse_address(addr)?;
        if record.id == self.local_id {
            return Err(PeerError::SelfConnect);
        }

        {
            let mut peers = self.peers.write().await;
            peers.insert(record.id, record.clone());
        }

        self.substrate.connect(&record).await?;
        log::info!("Connected to peer: {}", record.id);
        Ok(record.id)
    }

    /// Remove a peer, returning its record if it was known
    pub async fn remove(&self, id: &PeerId) -> Option<PeerRecord> {
        let removed = {
            let mut peers = self.peers.write().await;
            peers.remove(id)
        };
        if removed.is_some() {
            log::info!("Removed peer: {}", id);
        }
        removed
    }

    /// Snapshot of all known peer IDs
    pub async fn list(&self) -> Vec<PeerId> {
        let peers = self.peers.read().await;
        peers.keys().copied().collect()
    }

    pub async fn get(&self, id: &PeerId) -> Option<PeerRecord> {
        let peers = self.peers.read().await;
        peers.get(id).cloned()
    }

    pub async fn contains(&self, id: &PeerId) -> bool {
        let peers = self.peers.read().await;
        peers.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        let peers = self.peers.read().await;
        peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }
}
