//! Per-connection diagnostic counters.
//!
//! Counters have no protocol effect.  A datagram is counted as received only
//! once it has passed the checksum and peer-address filters, so stray or
//! corrupted traffic never shows up here.

/// Segment and byte counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Segments that had to be retransmitted.
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Payload bytes that had to be retransmitted.
    pub bytes_lost: u64,
}

impl Stats {
    pub(crate) fn record_sent(&mut self, wire_bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += wire_bytes as u64;
    }

    pub(crate) fn record_received(&mut self, wire_bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += wire_bytes as u64;
    }

    pub(crate) fn record_lost(&mut self, payload_bytes: usize) {
        self.packets_lost += 1;
        self.bytes_lost += payload_bytes as u64;
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sent {} pkt / {} B, received {} pkt / {} B, lost {} pkt / {} B",
            self.packets_sent,
            self.bytes_sent,
            self.packets_received,
            self.bytes_received,
            self.packets_lost,
            self.bytes_lost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut s = Stats::default();
        s.record_sent(40);
        s.record_sent(32);
        s.record_received(32);
        s.record_lost(8);
        assert_eq!(s.packets_sent, 2);
        assert_eq!(s.bytes_sent, 72);
        assert_eq!(s.packets_received, 1);
        assert_eq!(s.packets_lost, 1);
        assert_eq!(s.bytes_lost, 8);
    }
}
