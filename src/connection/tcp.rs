//! Async TCP transport to the server.
//!
//! A thin wrapper over `tokio::net::TcpStream`, split into owned read and
//! write halves so the connection actor can await inbound bytes and write
//! outbound frames from separate `select!` arms. Framing and parsing live
//! above this layer.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{KvPipeError, Result};

/// Per-read scratch capacity.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// A freshly established TCP connection.
pub struct RawConnection {
    stream: TcpStream,
}

impl RawConnection {
    /// Connect to `addr` (e.g. "127.0.0.1:6379").
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok(); // Disable Nagle for low latency
        Ok(Self { stream })
    }

    /// Connect with a deadline.
    pub async fn connect_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        match tokio::time::timeout(timeout, Self::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(KvPipeError::Timeout(format!(
                "connection to {addr} timed out after {timeout:?}"
            ))),
        }
    }

    /// Split into independently-owned read and write halves.
    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        let (rd, wr) = self.stream.into_split();
        (
            ReadHalf {
                inner: rd,
                scratch: BytesMut::with_capacity(READ_CHUNK_SIZE),
            },
            WriteHalf { inner: wr },
        )
    }
}

/// Inbound half: delivers whatever chunk the socket has ready.
pub struct ReadHalf {
    inner: OwnedReadHalf,
    scratch: BytesMut,
}

impl ReadHalf {
    /// Wait for the next chunk of inbound bytes.
    ///
    /// An orderly or abrupt close surfaces as a `Connection` error; the
    /// caller decides whether that means reconnect or shutdown.
    pub async fn read_some(&mut self) -> Result<Bytes> {
        if self.scratch.capacity() < 4096 {
            self.scratch.reserve(READ_CHUNK_SIZE);
        }
        let n = self.inner.read_buf(&mut self.scratch).await?;
        if n == 0 {
            return Err(KvPipeError::Connection(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        Ok(self.scratch.split().freeze())
    }
}

/// Outbound half: writes pre-encoded frames.
pub struct WriteHalf {
    inner: OwnedWriteHalf,
}

impl WriteHalf {
    /// Write a complete frame (or batch of frames) to the socket.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
