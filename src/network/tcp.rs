//! TCP substrate
//!
//! Each TCP connection carries exactly one protocol stream. The dialing side
//! opens with a preamble naming the protocol and its own peer ID:
//!
//! ```text
//! MAGIC "ANON" (4) | protocol len (u8) | protocol | sender peer ID (32)
//! ```
//!
//! Everything after the preamble belongs to the protocol. The sender ID is
//! taken at face value; this substrate provides no transport security.

use crate::network::peer::{
    format_tcp_address, parse_tcp_address, PeerError, PeerId, PeerRecord, PEER_ID_LEN,
};
use crate::network::substrate::{BoxedStream, InboundStream, StreamHandler, Substrate};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Magic bytes opening every stream
pub const MAGIC: [u8; 4] = [0x41, 0x4E, 0x4F, 0x4E]; // "ANON"

/// Internal protocol used by `connect` to verify a peer's identity
pub const PING_PROTOCOL: &str = "/anonbox/ping/1.0.0";

/// How long an accepted connection may take to send its preamble
const PREAMBLE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a dial may take
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

type HandlerMap = Arc<RwLock<HashMap<String, StreamHandler>>>;

/// Preamble written by the dialing side of every connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPreamble {
    pub protocol: String,
    pub sender: PeerId,
}

impl StreamPreamble {
    pub fn new(protocol: &str, sender: PeerId) -> Self {
        Self {
            protocol: protocol.to_string(),
            sender,
        }
    }

    pub fn encode(&self) -> Result<BytesMut, PeerError> {
        let protocol_len = u8::try_from(self.protocol.len())
            .map_err(|_| PeerError::UnsupportedProtocol(self.protocol.clone()))?;

        let mut buf = BytesMut::with_capacity(4 + 1 + self.protocol.len() + PEER_ID_LEN);
        buf.put_slice(&MAGIC);
        buf.put_u8(protocol_len);
        buf.put_slice(self.protocol.as_bytes());
        buf.put_slice(self.sender.as_bytes());
        Ok(buf)
    }

    /// Read a preamble without consuming any bytes past it
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, PeerError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).await?;
        if magic != MAGIC {
            return Err(PeerError::ConnectionFailed("Invalid magic bytes".to_string()));
        }

        let protocol_len = reader.read_u8().await? as usize;
        let mut protocol = vec![0u8; protocol_len];
        reader.read_exact(&mut protocol).await?;
        let protocol = String::from_utf8(protocol)
            .map_err(|_| PeerError::ConnectionFailed("Protocol is not UTF-8".to_string()))?;

        let mut sender = [0u8; PEER_ID_LEN];
        reader.read_exact(&mut sender).await?;

        Ok(Self {
            protocol,
            sender: PeerId::from_bytes(sender),
        })
    }
}

/// Peer host speaking plain TCP
pub struct TcpHost {
    id: PeerId,
    local_addr: SocketAddr,
    handlers: HandlerMap,
    /// Known addresses per peer, verified ones first
    address_book: RwLock<HashMap<PeerId, Vec<SocketAddr>>>,
    accept_task: JoinHandle<()>,
}

impl TcpHost {
    /// Bind to a port on all interfaces with a fresh peer ID
    pub async fn bind(port: u16) -> Result<Arc<Self>, std::io::Error> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        Self::bind_addr(addr, PeerId::random()).await
    }

    /// Bind to a specific address with a given peer ID
    pub async fn bind_addr(addr: SocketAddr, id: PeerId) -> Result<Arc<Self>, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Host listening on {} as {}", local_addr, id);

        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let accept_task = tokio::spawn(accept_loop(listener, id, handlers.clone()));

        Ok(Arc::new(Self {
            id,
            local_addr,
            handlers,
            address_book: RwLock::new(HashMap::new()),
            accept_task,
        }))
    }

    /// Get the listening address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the listening port
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Ask `addr` for its peer ID
    async fn ping(&self, addr: SocketAddr) -> Result<PeerId, PeerError> {
        let mut stream = self.dial(addr, PING_PROTOCOL).await?;
        let mut id = [0u8; PEER_ID_LEN];
        stream.read_exact(&mut id).await?;
        Ok(PeerId::from_bytes(id))
    }

    async fn drop_address(&self, peer: &PeerId, addr: &SocketAddr) {
        let mut book = self.address_book.write().await;
        if let Some(addrs) = book.get_mut(peer) {
            addrs.retain(|a| a != addr);
            if addrs.is_empty() {
                book.remove(peer);
            }
        }
    }

    async fn dial(&self, addr: SocketAddr, protocol: &str) -> Result<TcpStream, PeerError> {
        let preamble = StreamPreamble::new(protocol, self.id).encode()?;

        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::ConnectionFailed(format!("{}: timed out", addr)))?
            .map_err(|e| PeerError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true)?;
        stream.write_all(&preamble).await?;

        Ok(stream)
    }
}

impl Drop for TcpHost {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[async_trait]
impl Substrate for TcpHost {
    fn local_id(&self) -> PeerId {
        self.id
    }

    fn listen_addresses(&self) -> Vec<String> {
        let ip = if self.local_addr.ip().is_unspecified() {
            get_local_ip()
                .map(IpAddr::V4)
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        } else {
            self.local_addr.ip()
        };
        vec![format_tcp_address(
            &SocketAddr::new(ip, self.local_addr.port()),
            &self.id,
        )]
    }

    fn parse_address(&self, addr: &str) -> Result<PeerRecord, PeerError> {
        parse_tcp_address(addr)
    }

    async fn connect(&self, peer: &PeerRecord) -> Result<(), PeerError> {
        // Addresses are kept even when every ping fails
        if !peer.addrs.is_empty() {
            let mut book = self.address_book.write().await;
            let addrs = book.entry(peer.id).or_default();
            for addr in &peer.addrs {
                if !addrs.contains(addr) {
                    addrs.push(*addr);
                }
            }
        }

        let mut last_err = PeerError::ConnectionFailed(format!("{}: no addresses", peer.id));

        for addr in &peer.addrs {
            match self.ping(*addr).await {
                Ok(id) if id == peer.id => {
                    let mut book = self.address_book.write().await;
                    let addrs = book.entry(peer.id).or_default();
                    addrs.retain(|a| a != addr);
                    addrs.insert(0, *addr);
                    return Ok(());
                }
                Ok(id) => {
                    // Address belongs to another peer
                    self.drop_address(&peer.id, addr).await;
                    last_err = PeerError::ConnectionFailed(format!(
                        "{} answered as {}, expected {}",
                        addr, id, peer.id
                    ));
                }
                Err(e) => last_err = e,
            }
        }

        Err(last_err)
    }

    async fn open_stream(&self, peer: &PeerId, protocol: &str) -> Result<BoxedStream, PeerError> {
        let addrs = {
            let book = self.address_book.read().await;
            book.get(peer).cloned()
        }
        .ok_or(PeerError::UnknownPeer(*peer))?;

        let mut last_err = PeerError::UnknownPeer(*peer);
        for addr in addrs {
            match self.dial(addr, protocol).await {
                Ok(stream) => return Ok(Box::new(stream)),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    async fn set_stream_handler(&self, protocol: &str, handler: StreamHandler) {
        let mut handlers = self.handlers.write().await;
        handlers.insert(protocol.to_string(), handler);
    }

    async fn remove_stream_handler(&self, protocol: &str) {
        let mut handlers = self.handlers.write().await;
        handlers.remove(protocol);
    }

    async fn forget(&self, peer: &PeerId) {
        let mut book = self.address_book.write().await;
        book.remove(peer);
    }
}

async fn accept_loop(listener: TcpListener, id: PeerId, handlers: HandlerMap) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                log::debug!("Incoming connection from {}", addr);
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, id, handlers).await {
                        log::warn!("Connection error with {}: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                log::error!("Accept error: {}", e);
            }
        }
    }
}

/// Read the preamble and hand the connection to the protocol's handler
async fn handle_connection(
    mut stream: TcpStream,
    id: PeerId,
    handlers: HandlerMap,
) -> Result<(), PeerError> {
    let preamble = tokio::time::timeout(PREAMBLE_TIMEOUT, StreamPreamble::read_from(&mut stream))
        .await
        .map_err(|_| PeerError::ConnectionFailed("preamble timed out".to_string()))??;

    if preamble.protocol == PING_PROTOCOL {
        stream.write_all(id.as_bytes()).await?;
        stream.shutdown().await?;
        return Ok(());
    }

    let handler = {
        let handlers = handlers.read().await;
        handlers.get(&preamble.protocol).cloned()
    }
    .ok_or_else(|| PeerError::UnsupportedProtocol(preamble.protocol.clone()))?;

    log::debug!("New {} stream from {}", preamble.protocol, preamble.sender);
    handler(InboundStream {
        remote: preamble.sender,
        protocol: preamble.protocol,
        io: Box::new(stream),
    });

    Ok(())
}

/// Get local IP address by connecting to a remote address
pub fn get_local_ip() -> Option<Ipv4Addr> {
    // Doesn't send any data, just determines the route
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:53").ok()?;

    let addr = socket.local_addr().ok()?;
    match addr.ip() {
        IpAddr::V4(ip) => Some(ip),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    async fn loopback_host() -> Arc<TcpHost> {
        TcpHost::bind_addr("127.0.0.1:0".parse().unwrap(), PeerId::random())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_preamble_roundtrip() {
        let sender = PeerId::random();
        let preamble = StreamPreamble::new("/anonbox/1.0.0", sender);
        let mut encoded = preamble.encode().unwrap().to_vec();
        encoded.extend_from_slice(b"body");

        let mut reader = &encoded[..];
        let decoded = StreamPreamble::read_from(&mut reader).await.unwrap();
        assert_eq!(decoded, preamble);
        // Body bytes are untouched
        assert_eq!(reader, b"body");
    }

    #[tokio::test]
    async fn test_preamble_bad_magic() {
        let mut reader = &b"NOPE\x00"[..];
        assert!(StreamPreamble::read_from(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_and_stream() {
        let a = loopback_host().await;
        let b = loopback_host().await;

        let (tx, mut rx) = mpsc::channel(1);
        b.set_stream_handler(
            "/test/1.0.0",
            Arc::new(move |mut stream: InboundStream| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    stream.io.read_to_end(&mut buf).await.unwrap();
                    tx.send((stream.remote, buf)).await.unwrap();
                });
            }),
        )
        .await;

        // Unknown until connected
        assert!(a.open_stream(&b.local_id(), "/test/1.0.0").await.is_err());

        let addr = format_tcp_address(&b.local_addr(), &b.local_id());
        let record = a.parse_address(&addr).unwrap();
        a.connect(&record).await.unwrap();

        let mut stream = a.open_stream(&b.local_id(), "/test/1.0.0").await.unwrap();
        stream.write_all(b"over tcp").await.unwrap();
        stream.shutdown().await.unwrap();

        let (from, data) = rx.recv().await.unwrap();
        assert_eq!(from, a.local_id());
        assert_eq!(data, b"over tcp");
    }

    #[tokio::test]
    async fn test_connect_rejects_wrong_identity() {
        let a = loopback_host().await;
        let b = loopback_host().await;

        let impostor = PeerRecord::new(PeerId::random(), vec![b.local_addr()]);
        let err = a.connect(&impostor).await.unwrap_err();
        assert!(matches!(err, PeerError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_peer_reachable_after_failed_connect() {
        let a = loopback_host().await;

        // Reserve a port with nothing listening on it
        let reserved = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let bob_addr = reserved.local_addr().unwrap();
        drop(reserved);

        let bob_id = PeerId::random();
        let record = PeerRecord::new(bob_id, vec![bob_addr]);
        assert!(a.connect(&record).await.is_err());

        // Bob comes up at the advertised address later
        let bob = TcpHost::bind_addr(bob_addr, bob_id).await.unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        bob.set_stream_handler(
            "/late/1.0.0",
            Arc::new(move |mut stream: InboundStream| {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    stream.io.read_to_end(&mut buf).await.unwrap();
                    tx.send(buf).await.unwrap();
                });
            }),
        )
        .await;

        let mut stream = a.open_stream(&bob_id, "/late/1.0.0").await.unwrap();
        stream.write_all(b"better late").await.unwrap();
        stream.shutdown().await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"better late");
    }

    #[tokio::test]
    async fn test_wrong_identity_address_not_kept() {
        let a = loopback_host().await;
        let b = loopback_host().await;

        let impostor = PeerId::random();
        let _ = a.connect(&PeerRecord::new(impostor, vec![b.local_addr()])).await;

        let err = a.open_stream(&impostor, "/x").await.err().unwrap();
        assert!(matches!(err, PeerError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_forget_drops_addresses() {
        let a = loopback_host().await;
        let b = loopback_host().await;

        a.connect(&PeerRecord::new(b.local_id(), vec![b.local_addr()]))
            .await
            .unwrap();
        a.forget(&b.local_id()).await;

        let err = a.open_stream(&b.local_id(), "/x").await.err().unwrap();
        assert!(matches!(err, PeerError::UnknownPeer(_)));
    }
}
