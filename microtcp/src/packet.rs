//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, control bits, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], rejecting
//!   truncated, inconsistent or corrupted input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|S|R|A|        unused         |          Window Size          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload Length                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Reserved 0                           |
//! |                          Reserved 1                           |
//! |                          Reserved 2                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       Checksum (CRC-32)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 32 bytes.
//! seq(4) + ack(4) + control(2) + window(2) + payload_len(4) + reserved(12) + checksum(4)

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Control bits carried in the 16-bit `control` header field.
    ///
    /// The four flags occupy the top nibble (bits 12–15); the remaining bits
    /// are sent as zero and ignored on receipt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Control: u16 {
        /// Acknowledgement field is valid.
        const ACK = 1 << 12;
        /// Reset the connection.
        const RST = 1 << 13;
        /// Synchronise sequence numbers (handshake).
        const SYN = 1 << 14;
        /// Finish: the sender has no more data to send.
        const FIN = 1 << 15;
    }
}

impl std::fmt::Display for Control {
    /// Flag names joined with `+`, e.g. `SYN+ACK`; `-` when none are set.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        // Print in handshake order rather than bit order.
        let mut first = true;
        for (name, flag) in [
            ("SYN", Control::SYN),
            ("FIN", Control::FIN),
            ("RST", Control::RST),
            ("ACK", Control::ACK),
        ] {
            if self.contains(flag) {
                if !first {
                    f.write_str("+")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 32;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_CONTROL: usize = 8;
const OFF_WINDOW: usize = 10;
const OFF_PAYLOAD_LEN: usize = 12;
const OFF_RESERVED: usize = 16;
const OFF_CHECKSUM: usize = 28;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Segment::encode`] converts to big-endian
/// on the wire and [`Segment::decode`] converts back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Sequence number of the first payload byte in this segment.
    pub seq: u32,
    /// Acknowledgement number (next expected sequence number from the peer).
    pub ack: u32,
    /// Control bits.
    pub control: Control,
    /// Advertised receive-window size in bytes.
    pub window: u16,
    /// Length of the payload in bytes.
    ///
    /// On encode this is computed from the actual payload length.
    /// On decode this is validated against the remaining buffer bytes.
    pub payload_len: u32,
    /// CRC-32 over the serialised segment with this field zeroed.
    ///
    /// On encode this is computed and written last.
    /// On decode this is verified before the segment is returned.
    pub checksum: u32,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Build a segment; `payload_len` and `checksum` are filled in by
    /// [`Segment::encode`].
    pub fn new(seq: u32, ack: u32, window: u16, control: Control, payload: Vec<u8>) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                control,
                window,
                payload_len: payload.len() as u32,
                checksum: 0,
            },
            payload,
        }
    }

    /// Build a segment without payload (SYN, ACK, FIN, RST and combinations).
    pub fn control(seq: u32, ack: u32, window: u16, control: Control) -> Self {
        Self::new(seq, ack, window, control, Vec::new())
    }

    /// `true` when every bit of `flags` is set on this segment.
    pub fn has(&self, flags: Control) -> bool {
        self.header.control.contains(flags)
    }

    /// `true` when this segment carries exactly `flags` and nothing else.
    pub fn is_exactly(&self, flags: Control) -> bool {
        self.header.control == flags
    }

    /// Number of bytes this segment occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// `header.payload_len` and `header.checksum` are computed from the actual
    /// payload; any values already stored in those fields are ignored.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_CONTROL..OFF_CONTROL + 2]
            .copy_from_slice(&self.header.control.bits().to_be_bytes());
        buf[OFF_WINDOW..OFF_WINDOW + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 4]
            .copy_from_slice(&(payload_len as u32).to_be_bytes());
        // Reserved words and the checksum field stay zero from the allocation.

        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = crc32fast::hash(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the `payload_len` field disagrees with `buf.len()`,
    /// - a reserved word is non-zero, or
    /// - the checksum does not verify.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let seq = read_u32(buf, OFF_SEQ);
        let ack = read_u32(buf, OFF_ACK);
        let control = Control::from_bits_truncate(read_u16(buf, OFF_CONTROL));
        let window = read_u16(buf, OFF_WINDOW);
        let payload_len = read_u32(buf, OFF_PAYLOAD_LEN);
        let checksum = read_u32(buf, OFF_CHECKSUM);

        if buf.len() - HEADER_LEN != payload_len as usize {
            return Err(PacketError::LengthMismatch {
                declared: payload_len,
                actual: buf.len() - HEADER_LEN,
            });
        }

        // Verify checksum: hash the header up to the checksum field, then four
        // zero bytes in its place, then the payload.
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf[..OFF_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&buf[HEADER_LEN..]);
        if hasher.finalize() != checksum {
            return Err(PacketError::ChecksumFailed);
        }

        // Checked after the checksum so a corrupted reserved word is reported
        // as corruption rather than a format error.
        if (0..3).any(|i| read_u32(buf, OFF_RESERVED + 4 * i) != 0) {
            return Err(PacketError::ReservedNotZero);
        }

        Ok(Segment {
            header: Header {
                seq,
                ack,
                control,
                window,
                payload_len,
                checksum,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_be_bytes([buf[off], buf[off + 1]])
}

/// Errors that can arise when parsing a raw datagram.
///
/// Every variant means the datagram is not a valid segment and must not be
/// acted upon.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer of {0} bytes is too short to contain a header")]
    BufferTooShort(usize),
    /// `payload_len` field does not match the actual remaining bytes.
    #[error("payload_len field says {declared} bytes but {actual} follow the header")]
    LengthMismatch { declared: u32, actual: usize },
    /// One of the reserved header words is not zero.
    #[error("reserved header field is not zero")]
    ReservedNotZero,
    /// Checksum did not match recomputed value.
    #[error("checksum verification failed")]
    ChecksumFailed,
}
