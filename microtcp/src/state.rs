//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy.  Transitions themselves live in [`crate::connection`]; the legal
//! ones are drawn below.
//!
//! ```text
//!            connect                       accept
//!  CLOSED ───SYN──▶ SYN_SENT      CLOSED ──▶ LISTEN ──SYN──▶ SYN_RECEIVED
//!                      │                                        │
//!                  SYN+ACK / ACK                               ACK
//!                      ▼                                        ▼
//!                 ESTABLISHED ◀─────────────────────────────────┘
//!                  │        │
//!   local shutdown │        │ peer FIN (ACKed)
//!        FIN+ACK   ▼        ▼
//!  CLOSING_INITIATED    CLOSING_RECEIVED
//!   (ACK, peer FIN,      (local shutdown: FIN+ACK,
//!    final ACK)           wait for ACK)
//!                  │        │
//!                  ▼        ▼
//!                   CLOSED
//!
//!  Any fatal error from any state ──▶ INVALID
//! ```

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No conversation exists.  Both the initial and the terminal state.
    #[default]
    Closed,
    /// Passive open in progress; waiting for a SYN from any address.
    Listen,
    /// SYN has been sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received and SYN+ACK sent; waiting for the final ACK.
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    Established,
    /// Local side sent FIN first; waiting for its ACK and the peer's FIN.
    ClosingInitiated,
    /// Peer's FIN has been received and acknowledged; local close pending.
    ClosingReceived,
    /// A fatal error occurred.  The connection is unusable.
    Invalid,
}

impl ConnectionState {
    /// `true` when application data may still be sent.
    pub fn can_send(self) -> bool {
        matches!(self, Self::Established | Self::ClosingReceived)
    }

    /// `true` when application data may still be read.
    pub fn can_recv(self) -> bool {
        matches!(self, Self::Established | Self::ClosingReceived)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::ClosingInitiated => "CLOSING_INITIATED",
            Self::ClosingReceived => "CLOSING_RECEIVED",
            Self::Invalid => "INVALID",
        };
        f.write_str(name)
    }
}
