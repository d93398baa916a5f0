//! Segment-oriented socket.
//!
//! [`Socket`] sits between a [`Transport`] and the connection logic and speaks
//! [`crate::packet::Segment`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O, encoding and decoding.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{PacketError, Segment};
use crate::transport::{Transport, UdpTransport};

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
///
/// Both variants are transport failures: fatal to whatever operation hit them.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The transport accepted fewer bytes than the encoded segment.
    #[error("short write: {sent} of {expected} bytes sent")]
    ShortWrite { sent: usize, expected: usize },
}

// ---------------------------------------------------------------------------
// Incoming
// ---------------------------------------------------------------------------

/// Outcome of one bounded receive.
#[derive(Debug)]
pub enum Incoming {
    /// A checksum-valid segment.
    Segment(Segment, SocketAddr),
    /// A datagram that failed to decode; it must not be acted upon.
    Corrupt(PacketError, SocketAddr),
    /// The wait expired without traffic.
    TimedOut,
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// A segment-oriented socket over any [`Transport`].
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    transport: Box<dyn Transport>,
    buf: Vec<u8>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Bind a new UDP-backed socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let transport = UdpTransport::bind(local_addr).await?;
        Self::with_transport(transport)
    }

    /// Wrap an already-bound transport.
    pub fn with_transport(transport: impl Transport + 'static) -> Result<Self, SocketError> {
        let local_addr = transport.local_addr()?;
        Ok(Self {
            local_addr,
            transport: Box::new(transport),
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    /// Encode `segment` and send it as a single datagram to `dest`.
    ///
    /// Returns the number of bytes written.  Anything short of the full
    /// encoding is reported as [`SocketError::ShortWrite`].
    pub async fn send_to(&self, segment: &Segment, dest: SocketAddr) -> Result<usize, SocketError> {
        let bytes = segment.encode();
        let sent = self.transport.send_to(&bytes, dest).await?;
        if sent != bytes.len() {
            return Err(SocketError::ShortWrite {
                sent,
                expected: bytes.len(),
            });
        }
        Ok(sent)
    }

    /// Wait at most `wait` for the next datagram and decode it.
    ///
    /// Datagrams that fail to decode are returned as [`Incoming::Corrupt`];
    /// the caller decides whether to keep waiting.
    pub async fn recv_from(&mut self, wait: Duration) -> Result<Incoming, SocketError> {
        match self.transport.recv_from(&mut self.buf, wait).await? {
            None => Ok(Incoming::TimedOut),
            Some((n, addr)) => match Segment::decode(&self.buf[..n]) {
                Ok(segment) => Ok(Incoming::Segment(segment, addr)),
                Err(e) => Ok(Incoming::Corrupt(e, addr)),
            },
        }
    }
}
