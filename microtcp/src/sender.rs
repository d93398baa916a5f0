//! Send-side state of the reliable delivery engine.
//!
//! [`Sender`] keeps the outbound half of a connection: the sequence-number
//! edges, the peer's advertised window, and the queue of segments that have
//! been transmitted but not yet acknowledged.
//!
//! # Protocol contract
//!
//! - Bytes in flight never exceed the peer's advertised window, except for a
//!   single one-byte probe when that window is zero and nothing is in flight.
//! - ACKs are **cumulative**: `ack = K` confirms every byte before `K`.
//! - On timeout the caller retransmits only the **oldest** unacknowledged
//!   segment; the receiver's cumulative ACK then covers whatever else it
//!   already holds.
//! - Sequence numbers are u32 and wrap around; comparisons treat two values
//!   as ordered when they are less than `u32::MAX / 2` apart.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::packet::{Control, Segment};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
pub(crate) fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

/// Returns `true` when sequence number `a` is < `b` in wrap-around space.
#[inline]
pub(crate) fn seq_lt(a: u32, b: u32) -> bool {
    a != b && seq_le(a, b)
}

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A data segment awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// The segment as it goes on the wire.
    pub segment: Segment,
    /// Total number of times this segment has been transmitted.
    pub tx_count: u32,
}

impl InFlight {
    /// First sequence number after this segment's payload.
    fn end(&self) -> u32 {
        self.segment
            .header
            .seq
            .wrapping_add(self.segment.payload.len() as u32)
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Send-side state for one connection.
///
/// # Sequence-number layout
///
/// ```text
///  snd_una            snd_nxt
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── usable window ──▶
/// ```
#[derive(Debug)]
pub struct Sender {
    /// Oldest unacknowledged sequence number (left window edge).
    snd_una: u32,
    /// Next sequence number to send (`local_sequence`).
    snd_nxt: u32,
    /// Receive window most recently advertised by the peer.
    peer_window: u16,
    /// Unacknowledged data segments, oldest first.
    in_flight: VecDeque<InFlight>,
}

impl Sender {
    /// Create a sender whose first byte will carry `isn`.
    pub fn new(isn: u32) -> Self {
        Self {
            snd_una: isn,
            snd_nxt: isn,
            peer_window: 0,
            in_flight: VecDeque::new(),
        }
    }

    /// Next sequence number this endpoint will send.
    pub fn next_seq(&self) -> u32 {
        self.snd_nxt
    }

    /// Receive window the peer last advertised.
    pub fn peer_window(&self) -> u16 {
        self.peer_window
    }

    pub fn set_peer_window(&mut self, window: u16) {
        self.peer_window = window;
    }

    /// Account for a SYN or FIN, which occupies one sequence number.
    ///
    /// Control segments are confirmed by the handshake and teardown logic
    /// rather than through [`Sender::on_ack`], so both edges move together.
    pub fn consume_control(&mut self) {
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.snd_una = self.snd_nxt;
    }

    /// Bytes sent but not yet acknowledged.
    pub fn bytes_in_flight(&self) -> usize {
        self.snd_nxt.wrapping_sub(self.snd_una) as usize
    }

    /// `true` when at least one segment is awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// How many new payload bytes may be sent right now.
    ///
    /// A closed window still admits one byte when nothing is outstanding, so
    /// the peer gets a segment to answer with its reopened window.
    pub fn usable_window(&self) -> usize {
        let window = self.peer_window as usize;
        if window == 0 && self.in_flight.is_empty() {
            return 1;
        }
        window.saturating_sub(self.bytes_in_flight())
    }

    /// Build a data segment carrying `payload` at the next sequence number.
    ///
    /// Call [`Sender::record_sent`] once it is on the wire.
    pub fn build_data_segment(&self, payload: Vec<u8>, ack: u32, window: u16) -> Segment {
        // data segments piggyback the receiver's ACK
        Segment::new(self.snd_nxt, ack, window, Control::ACK, payload)
    }

    /// Place a just-transmitted data segment in the queue and advance `snd_nxt`.
    pub fn record_sent(&mut self, segment: Segment) {
        debug_assert_eq!(segment.header.seq, self.snd_nxt, "segment out of sequence");
        self.snd_nxt = self.snd_nxt.wrapping_add(segment.payload.len() as u32);
        self.in_flight.push_back(InFlight {
            segment,
            tx_count: 1,
        });
    }

    /// Process a cumulative ACK and the window advertised alongside it.
    ///
    /// Returns the number of newly acknowledged bytes; `0` for a duplicate,
    /// stale or out-of-range ACK.  The peer window is refreshed from any ACK
    /// that is not stale.
    pub fn on_ack(&mut self, ack: u32, window: u16) -> usize {
        // Reject ACKs behind snd_una or beyond what was ever sent.
        if !seq_le(self.snd_una, ack) || !seq_le(ack, self.snd_nxt) {
            return 0;
        }
        self.peer_window = window;

        let acked = ack.wrapping_sub(self.snd_una) as usize;
        self.snd_una = ack;
        while let Some(front) = self.in_flight.front() {
            if seq_le(front.end(), ack) {
                self.in_flight.pop_front();
            } else {
                break;
            }
        }
        acked
    }

    /// The segment to retransmit on timeout.
    pub fn oldest(&self) -> Option<&InFlight> {
        self.in_flight.front()
    }

    /// Record a retransmission of the oldest segment.
    pub fn on_retransmit(&mut self) {
        if let Some(front) = self.in_flight.front_mut() {
            front.tx_count += 1;
        }
    }

    /// Drop every queued segment.
    pub fn release(&mut self) {
        self.in_flight = VecDeque::new();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sender_with_window(isn: u32, window: u16) -> Sender {
        let mut s = Sender::new(isn);
        s.set_peer_window(window);
        s
    }

    fn push(s: &mut Sender, len: usize) {
        let seg = s.build_data_segment(vec![0u8; len], 0, 8192);
        s.record_sent(seg);
    }

    #[test]
    fn initial_state() {
        let s = Sender::new(100);
        assert_eq!(s.next_seq(), 100);
        assert_eq!(s.snd_una, 100);
        assert!(!s.has_unacked());
        assert_eq!(s.bytes_in_flight(), 0);
    }

    #[test]
    fn record_sent_advances_next_seq() {
        let mut s = sender_with_window(0, 100);
        push(&mut s, 3);

        assert_eq!(s.next_seq(), 3);
        assert_eq!(s.snd_una, 0); // not acked yet
        assert_eq!(s.in_flight.len(), 1);
        assert_eq!(s.usable_window(), 97);
    }

    #[test]
    fn window_full_blocks_send() {
        let mut s = sender_with_window(0, 10);
        push(&mut s, 5);
        push(&mut s, 5);
        assert_eq!(s.usable_window(), 0);
    }

    #[test]
    fn zero_window_allows_single_probe() {
        let mut s = sender_with_window(0, 0);
        assert_eq!(s.usable_window(), 1);
        push(&mut s, 1);
        assert_eq!(s.usable_window(), 0);
    }

    #[test]
    fn cumulative_ack_slides_multiple() {
        let mut s = sender_with_window(0, 100);
        for _ in 0..3 {
            push(&mut s, 5);
        }
        assert_eq!(s.next_seq(), 15);

        let acked = s.on_ack(15, 100);
        assert_eq!(acked, 15);
        assert_eq!(s.snd_una, 15);
        assert!(!s.has_unacked());
    }

    #[test]
    fn partial_cumulative_ack() {
        let mut s = sender_with_window(0, 100);
        for _ in 0..3 {
            push(&mut s, 5);
        }
        assert_eq!(s.on_ack(10, 100), 10);
        assert_eq!(s.in_flight.len(), 1);
        assert_eq!(s.oldest().unwrap().segment.header.seq, 10);
    }

    #[test]
    fn ack_inside_a_segment_keeps_it_queued() {
        let mut s = sender_with_window(0, 100);
        push(&mut s, 10);
        assert_eq!(s.on_ack(4, 100), 4);
        assert_eq!(s.in_flight.len(), 1);
        assert_eq!(s.bytes_in_flight(), 6);
    }

    #[test]
    fn duplicate_ack_returns_zero_but_updates_window() {
        let mut s = sender_with_window(0, 100);
        push(&mut s, 5);
        assert_eq!(s.on_ack(5, 100), 5);
        assert_eq!(s.on_ack(5, 40), 0);
        assert_eq!(s.peer_window(), 40);
    }

    #[test]
    fn spurious_ack_beyond_next_seq_ignored() {
        let mut s = sender_with_window(0, 100);
        push(&mut s, 5);
        assert_eq!(s.on_ack(1000, 7), 0);
        assert_eq!(s.snd_una, 0);
        assert_eq!(s.peer_window(), 100);
    }

    #[test]
    fn retransmit_counts_oldest_only() {
        let mut s = sender_with_window(0, 100);
        push(&mut s, 5);
        push(&mut s, 5);
        s.on_retransmit();
        let counts: Vec<u32> = s.in_flight.iter().map(|e| e.tx_count).collect();
        assert_eq!(counts, vec![2, 1]);
    }

    #[test]
    fn control_consumes_one_sequence_number() {
        let mut s = Sender::new(41);
        s.consume_control();
        assert_eq!(s.next_seq(), 42);
        assert_eq!(s.snd_una, 42);
    }

    #[test]
    fn seq_wrap_around() {
        let start = u32::MAX - 5;
        let mut s = sender_with_window(start, 100);
        push(&mut s, 10); // wraps past zero

        let expected_ack = start.wrapping_add(10);
        assert_eq!(s.on_ack(expected_ack, 100), 10);
        assert_eq!(s.snd_una, expected_ack);
        assert!(seq_lt(start, expected_ack));
    }
}
