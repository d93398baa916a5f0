//! Receive-side state of the reliable delivery engine.
//!
//! The [`Receiver`] is responsible for everything that happens *after* a
//! datagram is decoded into a [`crate::packet::Segment`] and *before* the
//! application reads contiguous bytes:
//! - Delivering in-order payload into the bounded receive buffer.
//! - Holding segments that arrive ahead of a gap, as long as they fit in the
//!   advertised window, and releasing them once the gap is filled.
//! - Trimming or discarding bytes that were already delivered, so nothing is
//!   handed to the application twice.
//! - Tracking `RCV.NXT` (the cumulative ACK) and the advertised window.
//!
//! The [`Receiver`] does **not** send ACKs itself; it provides the values
//! that [`crate::connection::Connection`] uses when constructing them.

use std::collections::VecDeque;

use crate::sender::{seq_le, seq_lt};

/// What happened to an inbound data segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// In-order bytes appended to the buffer (including any held segments
    /// the arrival released).
    Accepted(usize),
    /// Arrived ahead of a gap and is held until the gap fills.
    Held,
    /// Every byte was delivered before.
    Duplicate,
    /// Does not fit in the receive window; dropped.
    Dropped,
}

/// What happened to an inbound FIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinOutcome {
    /// First sight of the peer's FIN; `RCV.NXT` moved past it.
    New,
    /// A retransmission of a FIN already consumed.
    Duplicate,
    /// FIN arrived before the data preceding it; ignored.
    Early,
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct Receiver {
    /// Next expected sequence number (`RCV.NXT`, the `peer_ack_expected`).
    rcv_nxt: u32,
    /// In-order payload bytes not yet read by the application.
    app_buffer: VecDeque<u8>,
    /// Segments received ahead of `rcv_nxt`, as `(seq, payload)`.
    held: Vec<(u32, Vec<u8>)>,
    /// Buffer capacity in bytes; zero once released.
    capacity: usize,
    /// Sequence number of the peer's FIN, once consumed.
    fin_seq: Option<u32>,
    released: bool,
}

impl Receiver {
    /// Create a receiver with room for `capacity` bytes.
    ///
    /// No memory is reserved until [`Receiver::open`].
    pub fn new(capacity: usize) -> Self {
        Self {
            rcv_nxt: 0,
            app_buffer: VecDeque::new(),
            held: Vec::new(),
            capacity,
            fin_seq: None,
            released: false,
        }
    }

    /// Start expecting `rcv_nxt` and allocate the receive buffer.
    ///
    /// Called once the peer's initial sequence number is known.
    pub fn open(&mut self, rcv_nxt: u32) {
        self.rcv_nxt = rcv_nxt;
        self.app_buffer.reserve(self.capacity);
    }

    /// Cumulative ACK number to place in the next outbound segment.
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }

    /// Bytes waiting for the application.
    pub fn buffered(&self) -> usize {
        self.app_buffer.len()
    }

    fn held_bytes(&self) -> usize {
        self.held.iter().map(|(_, p)| p.len()).sum()
    }

    /// Advertised receive window: free buffer space, less bytes already held
    /// out of order, capped to the 16-bit header field.
    pub fn window(&self) -> u16 {
        let free = self
            .capacity
            .saturating_sub(self.app_buffer.len())
            .saturating_sub(self.held_bytes());
        free.min(u16::MAX as usize) as u16
    }

    /// `true` once the peer's FIN has been consumed.
    pub fn fin_received(&self) -> bool {
        self.fin_seq.is_some()
    }

    /// `true` once [`Receiver::release`] has run.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Process the payload of an inbound segment.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> Delivery {
        if self.released || payload.is_empty() {
            return Delivery::Dropped;
        }
        let end = seq.wrapping_add(payload.len() as u32);
        if seq_le(end, self.rcv_nxt) {
            return Delivery::Duplicate;
        }

        if seq_le(seq, self.rcv_nxt) {
            // Starts at or before rcv_nxt: skip what was delivered already.
            let skip = self.rcv_nxt.wrapping_sub(seq) as usize;
            let fresh = self.accept_in_order(&payload[skip..]);
            if fresh == 0 {
                return Delivery::Dropped;
            }
            let released = self.release_held();
            return Delivery::Accepted(fresh + released);
        }

        // Ahead of a gap.
        let ahead = seq.wrapping_sub(self.rcv_nxt) as usize;
        let room = self.capacity.saturating_sub(self.app_buffer.len());
        if ahead + payload.len() > room {
            return Delivery::Dropped;
        }
        // Keep only bytes no held segment covers yet.  Held ranges stay
        // disjoint and inside the window, so they never exceed capacity.
        let fresh = self.uncovered(ahead, ahead + payload.len());
        let fresh_len: usize = fresh.iter().map(|(a, b)| b - a).sum();
        if fresh_len > room.saturating_sub(self.held_bytes()) {
            return Delivery::Dropped;
        }
        for (start, end) in fresh {
            let piece = payload[start - ahead..end - ahead].to_vec();
            self.held.push((self.rcv_nxt.wrapping_add(start as u32), piece));
        }
        Delivery::Held
    }

    /// Offset range `[start, end)` from `rcv_nxt` covered by a held segment.
    fn held_span(&self, seq: u32, len: usize) -> (usize, usize) {
        let end = seq.wrapping_add(len as u32).wrapping_sub(self.rcv_nxt) as usize;
        if seq_le(seq, self.rcv_nxt) {
            (0, end)
        } else {
            (seq.wrapping_sub(self.rcv_nxt) as usize, end)
        }
    }

    /// Sub-ranges of `[start, end)` (offsets from `rcv_nxt`) that no held
    /// segment covers.
    fn uncovered(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut spans: Vec<(usize, usize)> = self
            .held
            .iter()
            .map(|(s, p)| self.held_span(*s, p.len()))
            .collect();
        spans.sort_unstable();

        let mut gaps = Vec::new();
        let mut cursor = start;
        for (a, b) in spans {
            if b <= cursor {
                continue;
            }
            if a >= end {
                break;
            }
            if a > cursor {
                gaps.push((cursor, a));
            }
            cursor = b;
        }
        if cursor < end {
            gaps.push((cursor, end));
        }
        gaps
    }

    /// Append as much of `data` as the buffer has room for.
    fn accept_in_order(&mut self, data: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.app_buffer.len());
        let n = data.len().min(room);
        self.app_buffer.extend(&data[..n]);
        self.rcv_nxt = self.rcv_nxt.wrapping_add(n as u32);
        n
    }

    /// Move held segments that now touch `rcv_nxt` into the buffer.
    fn release_held(&mut self) -> usize {
        let mut total = 0;
        loop {
            // Forget anything entirely behind rcv_nxt.
            let nxt = self.rcv_nxt;
            self.held
                .retain(|(s, p)| seq_lt(nxt, s.wrapping_add(p.len() as u32)));

            let Some(idx) = self.held.iter().position(|(s, _)| seq_le(*s, nxt)) else {
                break;
            };
            let (seq, payload) = self.held.swap_remove(idx);
            let skip = nxt.wrapping_sub(seq) as usize;
            let n = self.accept_in_order(&payload[skip..]);
            if n == 0 {
                // Buffer full; keep the segment for later.
                self.held.push((seq, payload));
                break;
            }
            total += n;
        }
        total
    }

    /// Process a FIN carrying sequence number `seq`.
    pub fn on_fin(&mut self, seq: u32) -> FinOutcome {
        match self.fin_seq {
            Some(fin) if fin == seq => FinOutcome::Duplicate,
            Some(_) => FinOutcome::Early,
            None if seq == self.rcv_nxt => {
                self.fin_seq = Some(seq);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                FinOutcome::New
            }
            None => FinOutcome::Early,
        }
    }

    /// Copy up to `buf.len()` in-order bytes into `buf`.  Returns the number
    /// of bytes copied.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.app_buffer.len());
        for (dst, src) in buf[..n].iter_mut().zip(self.app_buffer.drain(..n)) {
            *dst = src;
        }
        n
    }

    /// Free the buffer.  Later segments are dropped.
    pub fn release(&mut self) {
        self.app_buffer = VecDeque::new();
        self.held = Vec::new();
        self.capacity = 0;
        self.released = true;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
