//! Local network peer discovery
//!
//! Every node periodically broadcasts a small JSON beacon over UDP and
//! listens for the beacons of others. Each beacon from a foreign peer ID is
//! turned into a peer record and handed to a callback; deduplication is left
//! to the peer registry.

use crate::network::peer::{PeerId, PeerRecord};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

// =============================================================================
// Constants
// =============================================================================

/// UDP port beacons are sent to and received on
pub const DISCOVERY_PORT: u16 = 47474;

/// Service tag carried in every beacon
pub const DISCOVERY_SERVICE_TAG: &str = "anonbox-pub";

/// How often to announce ourselves
const BEACON_INTERVAL: Duration = Duration::from_secs(5);

/// Largest datagram we bother parsing
const MAX_BEACON_SIZE: usize = 1024;

/// Called with every peer seen on the local network
pub type PeerFoundCallback = Arc<dyn Fn(PeerRecord) + Send + Sync>;

// =============================================================================
// Beacon
// =============================================================================

/// Presence announcement broadcast on the local network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    pub service: String,
    pub peer_id: PeerId,
    /// TCP port the peer accepts streams on
    pub port: u16,
}

impl Beacon {
    pub fn new(peer_id: PeerId, port: u16) -> Self {
        Self {
            service: DISCOVERY_SERVICE_TAG.to_string(),
            peer_id,
            port,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Turn a received datagram into a peer record, ignoring our own beacons,
/// other services and anything malformed
pub fn handle_datagram(data: &[u8], src: SocketAddr, local_id: &PeerId) -> Option<PeerRecord> {
    let beacon = Beacon::from_bytes(data).ok()?;
    if beacon.service != DISCOVERY_SERVICE_TAG || beacon.peer_id == *local_id {
        return None;
    }
    Some(PeerRecord::new(
        beacon.peer_id,
        vec![SocketAddr::new(src.ip(), beacon.port)],
    ))
}

// =============================================================================
// Discovery Service
// =============================================================================

/// Discovery settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Port to listen for beacons on
    pub listen_port: u16,
    /// Where beacons are sent
    pub broadcast_addr: SocketAddr,
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            listen_port: DISCOVERY_PORT,
            broadcast_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT),
            interval: BEACON_INTERVAL,
        }
    }
}

/// Running beacon sender and listener
pub struct LanDiscovery {
    tasks: Vec<JoinHandle<()>>,
}

impl LanDiscovery {
    /// Start announcing `local_id` (reachable on `stream_port`) and reporting
    /// peers to `on_found`
    pub async fn start(
        local_id: PeerId,
        stream_port: u16,
        config: DiscoveryConfig,
        on_found: PeerFoundCallback,
    ) -> Result<Self, std::io::Error> {
        let mut tasks = Vec::new();

        let sender = UdpSocket::bind("0.0.0.0:0").await?;
        sender.set_broadcast(true)?;
        let beacon = Beacon::new(local_id, stream_port).to_bytes()?;
        tasks.push(tokio::spawn(announce_loop(
            sender,
            beacon,
            config.broadcast_addr,
            config.interval,
        )));

        match UdpSocket::bind(("0.0.0.0", config.listen_port)).await {
            Ok(listener) => {
                tasks.push(tokio::spawn(listen_loop(listener, local_id, on_found)));
            }
            Err(e) => {
                // Another node on this host owns the port; we can still be found
                log::warn!(
                    "Discovery listener unavailable on port {}: {}",
                    config.listen_port,
                    e
                );
            }
        }

        log::info!("Started peer discovery");
        Ok(Self { tasks })
    }

    /// Whether we are receiving beacons as well as sending them
    pub fn is_listening(&self) -> bool {
        self.tasks.len() > 1
    }

    /// Stop peer discovery
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        log::info!("Stopped peer discovery");
    }
}

impl Drop for LanDiscovery {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn announce_loop(socket: UdpSocket, beacon: Vec<u8>, target: SocketAddr, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&beacon, target).await {
            log::debug!("Failed to send discovery beacon: {}", e);
        }
    }
}

async fn listen_loop(socket: UdpSocket, local_id: PeerId, on_found: PeerFoundCallback) {
    let mut buf = [0u8; MAX_BEACON_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                if let Some(record) = handle_datagram(&buf[..len], src, &local_id) {
                    on_found(record);
                }
            }
            Err(e) => {
                log::warn!("Discovery receive error: {}", e);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_beacon_roundtrip() {
        let beacon = Beacon::new(PeerId::random(), 4001);
        let decoded = Beacon::from_bytes(&beacon.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, beacon);
    }

    #[test]
    fn test_handle_datagram() {
        let local = PeerId::random();
        let remote = PeerId::random();
        let src: SocketAddr = "192.168.0.20:51234".parse().unwrap();

        let data = Beacon::new(remote, 4001).to_bytes().unwrap();
        let record = handle_datagram(&data, src, &local).unwrap();
        assert_eq!(record.id, remote);
        // Address comes from the datagram source, port from the beacon
        assert_eq!(record.addrs, vec!["192.168.0.20:4001".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_handle_datagram_ignores_noise() {
        let local = PeerId::random();
        let src: SocketAddr = "10.0.0.1:1".parse().unwrap();

        let own = Beacon::new(local, 4001).to_bytes().unwrap();
        assert!(handle_datagram(&own, src, &local).is_none());

        let mut other_service = Beacon::new(PeerId::random(), 4001);
        other_service.service = "something-else".to_string();
        let data = other_service.to_bytes().unwrap();
        assert!(handle_datagram(&data, src, &local).is_none());

        assert!(handle_datagram(b"garbage", src, &local).is_none());
    }

    #[tokio::test]
    async fn test_beacons_reach_listener() {
        // Find a free port for the listener, then aim the announcer at it
        let reserved = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = reserved.local_addr().unwrap().port();
        drop(reserved);

        let (tx, mut rx) = mpsc::channel(4);
        let listener_id = PeerId::random();
        let listener = LanDiscovery::start(
            listener_id,
            9,
            DiscoveryConfig {
                listen_port: port,
                broadcast_addr: "127.0.0.1:9".parse().unwrap(),
                interval: Duration::from_secs(60),
            },
            Arc::new(move |record: PeerRecord| {
                let _ = tx.try_send(record);
            }),
        )
        .await
        .unwrap();
        assert!(listener.is_listening());

        let announcer_id = PeerId::random();
        let _announcer = LanDiscovery::start(
            announcer_id,
            4242,
            DiscoveryConfig {
                listen_port: port,
                broadcast_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
                interval: Duration::from_millis(50),
            },
            Arc::new(|_: PeerRecord| {}),
        )
        .await
        .unwrap();

        let record = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id, announcer_id);
        assert_eq!(record.addrs[0].port(), 4242);
    }
}
