//! `microtcp`: a reliable, connection-oriented byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   segments   ┌──────────┐
//!  │  Sender  │─────────────▶│ Receiver │
//!  └────┬─────┘              └─────┬────┘
//!       │                          │
//!       │   cumulative ACKs + win  │
//!       │◀─────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │           Connection              │
//!  │  (state machine, timers, socket)  │
//!  └────┬──────────────────────────────┘
//!       │ 32-byte header + payload, CRC-32 protected
//!  ┌────▼──────┐
//!  │  Socket   │  (codec over a Transport)
//!  └────┬──────┘
//!  ┌────▼──────────────────────────────┐
//!  │ UdpTransport  /  Simulator<T>     │
//!  └───────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      : wire format (encode / decode, checksum)
//! - [`state`]       : finite-state-machine types
//! - [`connection`]  : handshake, transfer and teardown for one peer
//! - [`sender`]      : outbound window and retransmission queue
//! - [`receiver`]    : inbound reassembly and receive buffer
//! - [`timer`]       : fixed retransmission timer
//! - [`transport`]   : datagram I/O seam, with the UDP implementation
//! - [`socket`]      : segment-level socket on top of a transport
//! - [`simulator`]   : loss/duplication/corruption/reorder injection
//! - [`stats`]       : per-connection traffic counters
//! - [`config`]      : tunable parameters

pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;
pub mod transport;

pub use config::{Config, ConfigError};
pub use connection::{ConnError, Connection};
pub use state::ConnectionState;
pub use stats::Stats;
