//! File transfer protocol
//!
//! One stream carries one file:
//!
//! ```text
//! +----------------+----------+--------------+-----------------+
//! | name len (i32) | name     | size (i64)   | content         |
//! | little-endian  | UTF-8    | little-endian| `size` raw bytes|
//! +----------------+----------+--------------+-----------------+
//! ```
//!
//! The content is streamed in chunks and never held in memory as a whole.
//! File content is not passed through the encryption envelope.

use crate::network::message::{InboundEvent, MessageSender, FILE_PROTOCOL};
use crate::network::peer::{PeerError, PeerId};
use crate::network::substrate::{InboundStream, StreamHandler, Substrate};
use bytes::{Buf, BufMut, BytesMut};
use futures::stream::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, FramedRead};

/// Chunk size used when streaming file content
pub const CHUNK_SIZE: usize = 4096;

/// Longest filename accepted from a remote peer, in bytes
pub const MAX_FILENAME_LEN: usize = 4096;

/// Bytes of fixed-size header fields (name length + file size)
const FIXED_HEADER_LEN: usize = 4 + 8;

/// File transfer errors
#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Peer(#[from] PeerError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Stream closed before the file header was complete")]
    TruncatedHeader,
    #[error("Invalid file header: {0}")]
    InvalidHeader(String),
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),
    #[error("Transfer truncated: expected {expected} bytes, got {received}")]
    Truncated { expected: u64, received: u64 },
}

/// Metadata sent ahead of the file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub filename: String,
    pub size: u64,
}

impl FileHeader {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
        }
    }
}

/// Reject anything that is not a plain base name
pub fn validate_filename(name: &str) -> Result<(), TransferError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.len() > MAX_FILENAME_LEN
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(TransferError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// Codec for the file header
pub struct FileHeaderCodec;

impl Encoder<FileHeader> for FileHeaderCodec {
    type Error = TransferError;

    fn encode(&mut self, item: FileHeader, dst: &mut BytesMut) -> Result<(), Self::Error> {
        validate_filename(&item.filename)?;
        let size = i64::try_from(item.size)
            .map_err(|_| TransferError::InvalidHeader(format!("file too large: {}", item.size)))?;

        dst.reserve(FIXED_HEADER_LEN + item.filename.len());
        dst.put_i32_le(item.filename.len() as i32);
        dst.put_slice(item.filename.as_bytes());
        dst.put_i64_le(size);

        Ok(())
    }
}

impl Decoder for FileHeaderCodec {
    type Item = FileHeader;
    type Error = TransferError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }

        let name_len = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if name_len < 0 || name_len as usize > MAX_FILENAME_LEN {
            return Err(TransferError::InvalidHeader(format!(
                "filename length {}",
                name_len
            )));
        }
        let name_len = name_len as usize;

        // Check if we have the full header
        if src.len() < FIXED_HEADER_LEN + name_len {
            src.reserve(FIXED_HEADER_LEN + name_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let name = src.split_to(name_len);
        let size = src.get_i64_le();
        if size < 0 {
            return Err(TransferError::InvalidHeader(format!("file size {}", size)));
        }

        let filename = String::from_utf8(name.to_vec()).map_err(|e| {
            TransferError::InvalidFilename(String::from_utf8_lossy(e.as_bytes()).into_owned())
        })?;
        validate_filename(&filename)?;

        Ok(Some(FileHeader::new(filename, size as u64)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(header) => Ok(Some(header)),
            None => Err(TransferError::TruncatedHeader),
        }
    }
}

/// Copy up to `limit` bytes in `CHUNK_SIZE` pieces, returning how many were
/// copied. Stops early only at end of input.
async fn copy_chunks<R, W>(reader: &mut R, writer: &mut W, limit: u64) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    while copied < limit {
        let want = (limit - copied).min(CHUNK_SIZE as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }

    Ok(copied)
}

/// Send the file at `path` to `peer`, returning the number of content bytes sent
pub async fn send_file(
    substrate: &dyn Substrate,
    peer: &PeerId,
    path: &Path,
) -> Result<u64, TransferError> {
    let mut file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(TransferError::NotAFile(path.to_path_buf()));
    }
    let size = metadata.len();

    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TransferError::InvalidFilename(path.display().to_string()))?;

    let mut header = BytesMut::new();
    FileHeaderCodec.encode(FileHeader::new(filename, size), &mut header)?;

    let mut stream = substrate.open_stream(peer, FILE_PROTOCOL).await?;
    stream.write_all(&header).await?;

    let sent = copy_chunks(&mut file, &mut stream, size).await?;
    if sent < size {
        return Err(TransferError::Truncated {
            expected: size,
            received: sent,
        });
    }
    stream.shutdown().await?;

    log::info!("Sent file {} ({} bytes) to {}", filename, size, peer);
    Ok(sent)
}

/// A file written to the download directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub sender: PeerId,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Receive one file from an inbound stream into `download_dir`.
///
/// A bad or truncated header fails before any file is created. A stream
/// that ends early leaves the partial file on disk and returns
/// [`TransferError::Truncated`].
pub async fn receive_file(
    stream: InboundStream,
    download_dir: &Path,
) -> Result<ReceivedFile, TransferError> {
    let sender = stream.remote;
    let mut framed = FramedRead::new(stream.io, FileHeaderCodec);

    let header = match framed.next().await {
        Some(result) => result?,
        None => return Err(TransferError::TruncatedHeader),
    };

    // The decoder may have read past the header into the content
    let buffered = std::mem::take(framed.read_buffer_mut());
    let mut io = framed.into_inner();

    log::info!(
        "Receiving file: {} ({} bytes) from {}",
        header.filename,
        header.size,
        sender
    );

    let path = download_dir.join(&header.filename);
    let mut file = File::create(&path).await?;

    let head = (buffered.len() as u64).min(header.size);
    file.write_all(&buffered[..head as usize]).await?;

    let copied = head + copy_chunks(&mut io, &mut file, header.size - head).await?;
    file.flush().await?;

    if copied < header.size {
        return Err(TransferError::Truncated {
            expected: header.size,
            received: copied,
        });
    }

    log::info!("Received file: {} ({} bytes)", header.filename, copied);
    Ok(ReceivedFile {
        sender,
        filename: header.filename,
        path,
        size: copied,
    })
}

/// Stream handler that spawns one receiver task per inbound file stream
pub fn handler(download_dir: PathBuf, events: MessageSender) -> StreamHandler {
    let download_dir = Arc::new(download_dir);
    Arc::new(move |stream: InboundStream| {
        let download_dir = download_dir.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let sender = stream.remote;
            match receive_file(stream, &download_dir).await {
                Ok(received) => {
                    events
                        .send(InboundEvent::file(sender.to_string(), &received.filename))
                        .await;
                }
                Err(e) => log::warn!("File transfer from {} failed: {}", sender, e),
            }
        });
    })
}
