//! Bounded, poll-driven reads and writes.
//!
//! A request is whatever arrives before the first quiet poll interval, a
//! NUL byte, or end of stream, whichever comes first. A short read is handed
//! up as-is; the protocol layer decides what an empty or truncated request
//! means. Every response is written followed by one NUL byte.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use dynalloc_core::config::ServerConfig;

use crate::error::{TransportError, TransportResult};

const READ_CHUNK: usize = 1024;
/// Poll intervals a rejected request may keep draining for.
const DRAIN_POLLS: u32 = 10;

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireConfig {
    pub max_message_size: usize,
    pub poll_interval: Duration,
    pub write_retries: u32,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for WireConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            max_message_size: server.max_message_size,
            poll_interval: server.poll_interval(),
            write_retries: server.write_retries,
        }
    }
}

/// Read one request. Trailing NUL bytes are not included.
pub async fn read_message<S>(stream: &mut S, wire: &WireConfig) -> TransportResult<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match tokio::time::timeout(wire.poll_interval, stream.read(&mut chunk)).await {
            Err(_) => {
                debug!(bytes = buf.len(), "read poll timed out, taking what arrived");
                break;
            }
            Ok(Err(e)) if e.kind() == ErrorKind::Interrupted => continue,
            Ok(Err(e)) if buf.is_empty() => return Err(e.into()),
            Ok(Err(e)) => {
                warn!(error = %e, bytes = buf.len(), "read failed mid-request, taking what arrived");
                break;
            }
            Ok(Ok(0)) if buf.is_empty() => return Err(TransportError::EmptyRead),
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
        };

        let received = &chunk[..n];
        let terminator = received.iter().position(|&b| b == 0);
        buf.extend_from_slice(&received[..terminator.unwrap_or(n)]);
        if buf.len() > wire.max_message_size {
            return Err(TransportError::MessageTooLarge {
                limit: wire.max_message_size,
            });
        }
        if terminator.is_some() {
            break;
        }
    }
    Ok(buf)
}

/// Drop whatever the peer is still sending, until it goes quiet or closes.
/// Used before answering a rejected request so the close is orderly.
///
/// The drain stops after `max_message_size` bytes or `DRAIN_POLLS` poll
/// intervals, whichever comes first, so a trickling peer cannot hold it.
pub async fn discard_pending<S>(stream: &mut S, wire: &WireConfig) -> usize
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + wire.poll_interval * DRAIN_POLLS;
    let mut chunk = [0u8; READ_CHUNK];
    let mut discarded = 0;
    while discarded < wire.max_message_size {
        let poll_end = deadline.min(Instant::now() + wire.poll_interval);
        match tokio::time::timeout_at(poll_end, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => discarded += n,
        }
    }
    if Instant::now() >= deadline || discarded >= wire.max_message_size {
        debug!(discarded, "stopped draining a peer that kept sending");
    }
    discarded
}

/// Write one response followed by a NUL byte.
///
/// Stalled or interrupted writes are retried up to `write_retries` times;
/// past that the write is reported as partial.
pub async fn write_message<S>(stream: &mut S, message: &str, wire: &WireConfig) -> TransportResult<()>
where
    S: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(message.len() + 1);
    frame.extend_from_slice(message.as_bytes());
    frame.push(0);

    let total = frame.len();
    let mut written = 0;
    let mut retries = 0u32;
    while written < total {
        match tokio::time::timeout(wire.poll_interval, stream.write(&frame[written..])).await {
            Ok(Ok(0)) => return Err(TransportError::PartialWrite { written, total }),
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {
                retries += 1;
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => retries += 1,
        }
        if retries > wire.write_retries {
            warn!(written, total, retries, "giving up on stalled write");
            return Err(TransportError::PartialWrite { written, total });
        }
    }
    stream.flush().await?;
    Ok(())
}
