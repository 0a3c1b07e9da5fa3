//! Text message protocol
//!
//! One stream carries exactly one message. The stream body is the whole
//! frame: the UTF-8 text when no key is configured, or the sealed envelope
//! when one is. There is no header or length prefix; the receiver reads until
//! the sender closes its write half.

use crate::crypto::{self, CryptoError, EncryptionKey, NONCE_SIZE, TAG_SIZE};
use crate::network::message::{InboundEvent, MessageSender, CHAT_PROTOCOL};
use crate::network::peer::{PeerError, PeerId};
use crate::network::substrate::{InboundStream, StreamHandler, Substrate};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Largest message text accepted, in bytes
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Largest frame accepted on the wire (text plus envelope overhead)
pub const MAX_FRAME_SIZE: usize = MAX_MESSAGE_SIZE + NONCE_SIZE + TAG_SIZE;

/// Text message errors
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Message too large: {0} bytes (max {max})", max = MAX_MESSAGE_SIZE)]
    TooLarge(usize),
}

/// Build the wire frame for `text`
pub fn encode_frame(text: &str, key: Option<&EncryptionKey>) -> Result<Vec<u8>, CryptoError> {
    match key {
        Some(key) => crypto::seal(text.as_bytes(), key),
        None => Ok(text.as_bytes().to_vec()),
    }
}

/// Recover the text carried by a wire frame
pub fn decode_frame(frame: &[u8], key: Option<&EncryptionKey>) -> Result<String, CryptoError> {
    let plaintext = match key {
        Some(key) => crypto::open(frame, key)?,
        None => frame.to_vec(),
    };
    Ok(String::from_utf8_lossy(&plaintext).into_owned())
}

/// Send a single text message to `peer`
pub async fn send_message(
    substrate: &dyn Substrate,
    peer: &PeerId,
    text: &str,
    key: Option<&EncryptionKey>,
) -> Result<(), ChatError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ChatError::TooLarge(text.len()));
    }
    let frame = encode_frame(text, key)?;

    let mut stream = substrate.open_stream(peer, CHAT_PROTOCOL).await?;
    stream.write_all(&frame).await?;
    stream.shutdown().await?;

    log::debug!("Sent {} byte message to {}", frame.len(), peer);
    Ok(())
}

/// Read one frame from an inbound stream and forward it as an event.
///
/// Read errors, oversize frames and frames that fail to open are logged and
/// dropped. Returns whether an event was delivered.
pub async fn receive_message(
    mut stream: InboundStream,
    key: Option<&EncryptionKey>,
    events: &MessageSender,
) -> bool {
    let sender = stream.remote;
    log::debug!("New message stream from {}", sender);

    let mut frame = Vec::new();
    let mut limited = (&mut stream.io).take(MAX_FRAME_SIZE as u64 + 1);
    if let Err(e) = limited.read_to_end(&mut frame).await {
        log::warn!("Stream read error from {}: {}", sender, e);
        return false;
    }
    drop(stream);

    if frame.len() > MAX_FRAME_SIZE {
        log::warn!("Dropping oversize message from {}", sender);
        return false;
    }

    let content = match decode_frame(&frame, key) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Decryption failed for message from {}: {}", sender, e);
            return false;
        }
    };

    log::debug!("Received {} byte message from {}", content.len(), sender);
    events
        .send(InboundEvent::text(sender.to_string(), content))
        .await
}

/// Stream handler that spawns one reader task per inbound message stream
pub fn handler(key: Option<EncryptionKey>, events: MessageSender) -> StreamHandler {
    Arc::new(move |stream: InboundStream| {
        let key = key.clone();
        let events = events.clone();
        tokio::spawn(async move {
            receive_message(stream, key.as_ref(), &events).await;
        });
    })
}
