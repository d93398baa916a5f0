//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one logical peer-to-peer
//! session.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]) through the
//!   three-way handshake and the four-message teardown.
//! - Coordinating [`crate::sender`] and [`crate::receiver`] once established.
//! - Filtering inbound segments: corrupted datagrams and datagrams from any
//!   address other than the confirmed peer are never acted upon.
//! - Retransmitting on the fixed timer from [`crate::timer`].
//!
//! Each operation runs to completion on the caller's task, waiting on the
//! socket with bounded timeouts.  A connection is meant to be driven by one
//! caller at a time.
//!
//! ```ignore
//! let mut conn = Connection::bind("127.0.0.1:0".parse()?, Config::default()).await?;
//! conn.connect(server).await?;
//! conn.send(b"hello").await?;
//! conn.shutdown().await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::packet::{Control, Segment};
use crate::receiver::{Delivery, FinOutcome, Receiver};
use crate::sender::{seq_lt, Sender};
use crate::socket::{Incoming, Socket, SocketError};
use crate::state::ConnectionState;
use crate::stats::Stats;
use crate::timer::RetransmitTimer;

/// Poll interval for waits that have no deadline.
const UNBOUNDED_POLL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by [`Connection`] operations.
///
/// Every error produced *during* an operation is fatal: the connection moves to
/// [`ConnectionState::Invalid`] and its buffers are released before the error
/// is returned.  [`ConnError::Closed`] and [`ConnError::BadState`] come from
/// precondition checks and leave the connection untouched.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The transport failed to send or receive.
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// The retry budget ran out.
    #[error("timed out waiting for {waiting_for} after {attempts} attempt(s)")]
    Timeout {
        waiting_for: &'static str,
        attempts: u32,
    },
    /// The peer sent control bits or numbers the state machine cannot accept.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
    /// The peer reset the connection.
    #[error("connection reset by peer")]
    Reset,
    /// The connection has been shut down.
    #[error("connection is closed")]
    Closed,
    /// The operation is not legal in the current state.
    #[error("operation not permitted in state {0}")]
    BadState(ConnectionState),
    /// The configuration cannot drive a connection.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// What one inbound segment changed.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    /// Newly acknowledged bytes.
    acked: usize,
    /// The peer's FIN was consumed.
    peer_fin: bool,
    /// The peer advertised a larger window than before.
    window_opened: bool,
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// One endpoint of a reliable connection.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    socket: Socket,
    /// Confirmed peer; segments from anywhere else are ignored.
    peer: Option<SocketAddr>,
    sender: Sender,
    receiver: Receiver,
    config: Config,
    /// Per-connection ISN source.
    rng: StdRng,
    stats: Stats,
    /// Set once the connection has reached its terminal state.
    spent: bool,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Create an unconnected endpoint on top of `socket`.
    ///
    /// Fails if `config` has a zero buffer, segment size, timeout or attempt
    /// budget.
    pub fn new(socket: Socket, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        let rng = match config.isn_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Ok(Self {
            state: ConnectionState::Closed,
            socket,
            peer: None,
            sender: Sender::new(0),
            receiver: Receiver::new(config.recv_buffer_len),
            config,
            rng,
            stats: Stats::default(),
            spent: false,
        })
    }

    /// Create an unconnected endpoint on a UDP socket bound to `local_addr`.
    pub async fn bind(local_addr: SocketAddr, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        let socket = Socket::bind(local_addr).await?;
        Self::new(socket, config)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// The confirmed peer, once the handshake has picked one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Next sequence number this endpoint will send.
    pub fn local_sequence(&self) -> u32 {
        self.sender.next_seq()
    }

    /// Next sequence number expected from the peer.
    pub fn peer_ack_expected(&self) -> u32 {
        self.receiver.ack_number()
    }

    /// Window the peer last advertised.
    pub fn send_window(&self) -> u16 {
        self.sender.peer_window()
    }

    /// Window this endpoint currently advertises.
    pub fn receive_window(&self) -> u16 {
        self.receiver.window()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `true` once the receive buffer has been freed (closed or failed).
    pub fn buffers_released(&self) -> bool {
        self.receiver.is_released()
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: perform the three-way handshake with `peer`.
    ///
    /// The SYN is retransmitted after each [`Config::handshake_timeout`] up to
    /// [`Config::max_handshake_attempts`] times.  Corrupted replies and
    /// replies from other addresses are ignored; a reply with the wrong
    /// control bits or acknowledgment number is fatal.
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.require_fresh()?;
        let result = self.active_open(peer).await;
        self.settle(result)
    }

    async fn active_open(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.peer = Some(peer);
        let isn: u32 = self.rng.random();
        self.sender = Sender::new(isn);

        let syn = Segment::control(isn, 0, self.receiver.window(), Control::SYN);
        self.state = ConnectionState::SynSent;

        for attempt in 1..=self.config.max_handshake_attempts {
            self.transmit(&syn).await?;
            let Some(reply) = self.next_from_peer(self.config.handshake_timeout).await? else {
                log::debug!("[microtcp] no SYN+ACK from {peer} (attempt {attempt})");
                continue;
            };

            if reply.has(Control::RST) {
                return Err(ConnError::Reset);
            }
            if !reply.has(Control::SYN | Control::ACK) {
                return Err(ConnError::ProtocolViolation("expected SYN+ACK"));
            }
            if reply.header.ack != isn.wrapping_add(1) {
                return Err(ConnError::ProtocolViolation(
                    "SYN+ACK acknowledges the wrong sequence number",
                ));
            }

            self.sender.consume_control();
            self.sender.set_peer_window(reply.header.window);
            self.receiver.open(reply.header.seq.wrapping_add(1));

            let ack = self.ack_segment();
            self.transmit(&ack).await?;
            self.state = ConnectionState::Established;
            log::info!(
                "[microtcp] established with {peer} (seq={} ack={} peer_win={})",
                self.sender.next_seq(),
                self.receiver.ack_number(),
                self.sender.peer_window()
            );
            return Ok(());
        }

        Err(ConnError::Timeout {
            waiting_for: "SYN+ACK",
            attempts: self.config.max_handshake_attempts,
        })
    }

    /// Passive open: wait for a SYN from any address and complete the
    /// handshake with its sender.  Returns the peer's address.
    ///
    /// Waiting for the first SYN is bounded by [`Config::idle_timeout`]; the
    /// SYN+ACK is retransmitted like the SYN in [`Connection::connect`].
    pub async fn accept(&mut self) -> Result<SocketAddr, ConnError> {
        self.require_fresh()?;
        let result = self.passive_open().await;
        self.settle(result)
    }

    async fn passive_open(&mut self) -> Result<SocketAddr, ConnError> {
        self.state = ConnectionState::Listen;
        self.peer = None;
        let (syn, peer) = self.await_syn().await?;

        self.peer = Some(peer);
        let isn: u32 = self.rng.random();
        self.sender = Sender::new(isn);
        self.sender.set_peer_window(syn.header.window);
        self.receiver.open(syn.header.seq.wrapping_add(1));

        let synack = Segment::control(
            isn,
            self.receiver.ack_number(),
            self.receiver.window(),
            Control::SYN | Control::ACK,
        );
        self.state = ConnectionState::SynReceived;

        for attempt in 1..=self.config.max_handshake_attempts {
            self.transmit(&synack).await?;
            let deadline = Instant::now() + self.config.handshake_timeout;

            while let Some(seg) = self.next_from_peer(until(deadline)).await? {
                if seg.has(Control::RST) {
                    return Err(ConnError::Reset);
                }
                if seg.has(Control::SYN) {
                    // Our SYN+ACK was lost and the peer retried.
                    if !seg.has(Control::ACK) && seg.header.seq == syn.header.seq {
                        self.transmit(&synack).await?;
                        continue;
                    }
                    return Err(ConnError::ProtocolViolation("unexpected SYN during handshake"));
                }
                if !seg.has(Control::ACK) {
                    return Err(ConnError::ProtocolViolation(
                        "expected ACK completing the handshake",
                    ));
                }
                if seg.header.ack != isn.wrapping_add(1) {
                    return Err(ConnError::ProtocolViolation(
                        "handshake ACK acknowledges the wrong sequence number",
                    ));
                }

                self.sender.consume_control();
                self.sender.set_peer_window(seg.header.window);
                self.state = ConnectionState::Established;
                log::info!(
                    "[microtcp] accepted {peer} (seq={} ack={} peer_win={})",
                    self.sender.next_seq(),
                    self.receiver.ack_number(),
                    self.sender.peer_window()
                );

                // The ACK may have been lost and this is already the first
                // data segment, which carries the same acknowledgment.
                if !seg.payload.is_empty() || seg.has(Control::FIN) {
                    self.handle_segment(seg).await?;
                }
                return Ok(peer);
            }
            log::debug!("[microtcp] no handshake ACK from {peer} (attempt {attempt})");
        }

        Err(ConnError::Timeout {
            waiting_for: "handshake ACK",
            attempts: self.config.max_handshake_attempts,
        })
    }

    /// Wait in LISTEN for a checksum-valid SYN from any address.
    async fn await_syn(&mut self) -> Result<(Segment, SocketAddr), ConnError> {
        let deadline = self.config.idle_timeout.map(|d| Instant::now() + d);
        loop {
            let wait = match deadline {
                Some(d) if Instant::now() >= d => {
                    return Err(ConnError::Timeout {
                        waiting_for: "SYN",
                        attempts: 1,
                    })
                }
                Some(d) => until(d),
                None => UNBOUNDED_POLL,
            };
            match self.next_segment(wait).await? {
                Some((seg, from)) if seg.has(Control::SYN) && !seg.has(Control::ACK) => {
                    return Ok((seg, from));
                }
                Some((seg, from)) => {
                    log::debug!(
                        "[microtcp] listening; ignoring {} from {from}",
                        seg.header.control
                    );
                }
                None => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Send `data` reliably.
    ///
    /// `data` is cut into segments of at most [`Config::mss`] bytes, never
    /// putting more in flight than the peer's advertised window.  The oldest
    /// unacknowledged segment is retransmitted every [`Config::ack_timeout`]
    /// until acknowledged.  Returns once every byte is acknowledged.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, ConnError> {
        self.require_open(ConnectionState::can_send)?;
        let result = self.send_all(data).await;
        self.settle(result)
    }

    async fn send_all(&mut self, data: &[u8]) -> Result<usize, ConnError> {
        let mut offset = 0;
        let mut timer = RetransmitTimer::new(self.config.ack_timeout);
        let mut timeouts = 0u32;

        while offset < data.len() || self.sender.has_unacked() {
            while offset < data.len() {
                let room = self.sender.usable_window().min(self.config.mss);
                if room == 0 {
                    break;
                }
                let end = data.len().min(offset + room);
                let seg = self.sender.build_data_segment(
                    data[offset..end].to_vec(),
                    self.receiver.ack_number(),
                    self.receiver.window(),
                );
                self.transmit(&seg).await?;
                self.sender.record_sent(seg);
                timer.arm_if_idle();
                offset = end;
            }

            match self.next_from_peer(timer.remaining()).await? {
                Some(seg) => {
                    let peer_acked = seg.has(Control::ACK);
                    let progress = self.handle_segment(seg).await?;
                    if peer_acked {
                        // The peer is alive, even if its window is still shut.
                        timeouts = 0;
                    }
                    if progress.acked > 0 || progress.window_opened {
                        if self.sender.has_unacked() {
                            timer.arm();
                        } else {
                            timer.disarm();
                        }
                    }
                }
                None => {
                    timeouts += 1;
                    if timeouts > self.config.max_retransmissions {
                        return Err(ConnError::Timeout {
                            waiting_for: "ACK",
                            attempts: timeouts,
                        });
                    }
                    self.retransmit_oldest().await?;
                    timer.arm();
                }
            }
        }
        Ok(data.len())
    }

    /// Receive up to `buf.len()` bytes.
    ///
    /// Returns buffered bytes immediately if there are any; otherwise waits for
    /// the next in-order data.  Returns `Ok(0)` once the peer has closed its
    /// side and everything before its FIN has been read.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        self.require_open(ConnectionState::can_recv)?;
        let result = self.recv_some(buf).await;
        self.settle(result)
    }

    async fn recv_some(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut idle_deadline = self.config.idle_timeout.map(|d| Instant::now() + d);

        loop {
            if self.receiver.buffered() > 0 {
                let before = self.receiver.window();
                let n = self.receiver.read(buf);
                // A nearly shut window just reopened: tell the sender.
                if usize::from(before) < self.config.mss && self.receiver.window() > before {
                    let update = self.ack_segment();
                    self.transmit(&update).await?;
                }
                return Ok(n);
            }
            if self.receiver.fin_received() {
                return Ok(0);
            }

            match self.next_from_peer(self.config.ack_timeout).await? {
                Some(seg) => {
                    self.handle_segment(seg).await?;
                    idle_deadline = self.config.idle_timeout.map(|d| Instant::now() + d);
                }
                None => {
                    if idle_deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(ConnError::Timeout {
                            waiting_for: "data",
                            attempts: 1,
                        });
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Close both directions of the connection.
    ///
    /// Sends FIN+ACK and waits for it to be acknowledged.  Unless the peer
    /// closed first, then waits for the peer's FIN+ACK and answers it with the
    /// final ACK.  On success the state is [`ConnectionState::Closed`], the
    /// buffers are released and every later operation fails with
    /// [`ConnError::Closed`].
    pub async fn shutdown(&mut self) -> Result<(), ConnError> {
        self.require_open(|s| {
            matches!(
                s,
                ConnectionState::Established | ConnectionState::ClosingReceived
            )
        })?;
        let result = self.teardown().await;
        self.settle(result)
    }

    async fn teardown(&mut self) -> Result<(), ConnError> {
        let peer_closed = self.state == ConnectionState::ClosingReceived;

        let fin = Segment::control(
            self.sender.next_seq(),
            self.receiver.ack_number(),
            self.receiver.window(),
            Control::FIN | Control::ACK,
        );
        let fin_end = fin.header.seq.wrapping_add(1);
        self.transmit(&fin).await?;
        self.sender.consume_control();
        if !peer_closed {
            self.state = ConnectionState::ClosingInitiated;
        }

        let mut fin_acked = false;
        let mut peer_fin = self.receiver.fin_received();
        let mut fin_deadline: Option<Instant> = None;
        let mut timer = RetransmitTimer::new(self.config.ack_timeout);
        let mut timeouts = 0u32;
        timer.arm();

        while !(fin_acked && peer_fin) {
            let Some(seg) = self.next_from_peer(timer.remaining()).await? else {
                if !fin_acked {
                    timeouts += 1;
                    if timeouts > self.config.max_retransmissions {
                        return Err(ConnError::Timeout {
                            waiting_for: "ACK of FIN",
                            attempts: timeouts,
                        });
                    }
                    log::debug!("[microtcp] timeout, retransmitting FIN");
                    self.transmit(&fin).await?;
                    self.stats.record_lost(0);
                } else if fin_deadline.is_some_and(|d| Instant::now() >= d) {
                    return Err(ConnError::Timeout {
                        waiting_for: "peer FIN",
                        attempts: 1,
                    });
                }
                timer.arm();
                continue;
            };

            if !fin_acked && seg.has(Control::ACK) && !seg.has(Control::RST) {
                let ack = seg.header.ack;
                if ack == fin_end {
                    if seg.is_exactly(Control::ACK) && seg.payload.is_empty() {
                        self.check_fin_ack_sequence(seg.header.seq)?;
                    }
                    log::debug!("[microtcp] FIN acknowledged");
                    fin_acked = true;
                    fin_deadline = self.config.idle_timeout.map(|d| Instant::now() + d);
                } else if !seq_lt(ack, fin_end) {
                    return Err(ConnError::ProtocolViolation(
                        "peer acknowledged beyond our FIN",
                    ));
                }
            }

            let progress = self.handle_segment(seg).await?;
            if progress.peer_fin {
                peer_fin = true;
            }
        }

        if !peer_closed {
            // Our final ACK may be lost; stay around to repeat it.
            self.linger().await?;
        }

        self.state = ConnectionState::Closed;
        self.spent = true;
        self.release();
        log::info!(
            "[microtcp] closed (seq={} ack={}); {}",
            self.sender.next_seq(),
            self.receiver.ack_number(),
            self.stats
        );
        Ok(())
    }

    /// A pure ACK of our FIN must come from exactly where the peer's stream
    /// stands.  One ahead is accepted while the peer's own FIN is still in
    /// flight.
    fn check_fin_ack_sequence(&self, seq: u32) -> Result<(), ConnError> {
        let expected = self.receiver.ack_number();
        let fin_outstanding = !self.receiver.fin_received() && seq == expected.wrapping_add(1);
        if seq == expected || fin_outstanding {
            Ok(())
        } else {
            Err(ConnError::ProtocolViolation(
                "ACK of FIN carries an unexpected sequence number",
            ))
        }
    }

    /// Answer retransmitted FINs for [`Config::time_wait`].
    async fn linger(&mut self) -> Result<(), ConnError> {
        let deadline = Instant::now() + self.config.time_wait;
        while let Some(seg) = self.next_from_peer(until(deadline)).await? {
            if seg.has(Control::FIN) {
                let ack = self.ack_segment();
                self.transmit(&ack).await?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Handle one segment from the peer while the data path is open (or
    /// closing): slide the send window, deliver payload, consume FIN, and
    /// acknowledge whatever needs it.
    async fn handle_segment(&mut self, seg: Segment) -> Result<Progress, ConnError> {
        let mut progress = Progress::default();

        if seg.has(Control::RST) {
            return Err(ConnError::Reset);
        }
        if seg.has(Control::SYN) {
            // A retransmitted SYN+ACK: our handshake ACK went missing.
            log::debug!("[microtcp] duplicate {}; repeating ACK", seg.header.control);
            let ack = self.ack_segment();
            self.transmit(&ack).await?;
            return Ok(progress);
        }

        if seg.has(Control::ACK) {
            let before = self.sender.peer_window();
            progress.acked = self.sender.on_ack(seg.header.ack, seg.header.window);
            progress.window_opened = self.sender.peer_window() > before;
            if progress.acked > 0 {
                log::debug!(
                    "[microtcp] ACK {} (+{} B, {} B in flight)",
                    seg.header.ack,
                    progress.acked,
                    self.sender.bytes_in_flight()
                );
            }
        }

        let mut reply = false;
        if !seg.payload.is_empty() {
            match self.receiver.on_segment(seg.header.seq, &seg.payload) {
                Delivery::Accepted(n) => log::trace!("[microtcp] delivered {n} B"),
                other => log::debug!(
                    "[microtcp] data seq={} len={} {other:?} (expecting {})",
                    seg.header.seq,
                    seg.payload.len(),
                    self.receiver.ack_number()
                ),
            }
            // Every data segment is answered, duplicates included, so a lost
            // ACK is repaired by the sender's retransmission.
            reply = true;
        }

        if seg.has(Control::FIN) {
            let fin_seq = seg.header.seq.wrapping_add(seg.payload.len() as u32);
            match self.receiver.on_fin(fin_seq) {
                FinOutcome::New => {
                    progress.peer_fin = true;
                    reply = true;
                    if self.state == ConnectionState::Established {
                        self.state = ConnectionState::ClosingReceived;
                    }
                    log::info!("[microtcp] peer closed its side (state {})", self.state);
                }
                FinOutcome::Duplicate => reply = true,
                FinOutcome::Early => {
                    log::debug!("[microtcp] FIN seq={fin_seq} ahead of data; ignored");
                }
            }
        }

        if reply {
            let ack = self.ack_segment();
            self.transmit(&ack).await?;
        }
        Ok(progress)
    }

    /// Resend the oldest unacknowledged data segment with fresh ACK fields.
    async fn retransmit_oldest(&mut self) -> Result<(), ConnError> {
        let Some(entry) = self.sender.oldest() else {
            return Ok(());
        };
        let mut seg = entry.segment.clone();
        let tries = entry.tx_count + 1;
        seg.header.ack = self.receiver.ack_number();
        seg.header.window = self.receiver.window();

        log::debug!(
            "[microtcp] timeout, retransmitting seq={} len={} (try {tries})",
            seg.header.seq,
            seg.payload.len()
        );
        self.transmit(&seg).await?;
        self.stats.record_lost(seg.payload.len());
        self.sender.on_retransmit();
        Ok(())
    }

    /// Build a pure ACK reflecting the current send/receive state.
    fn ack_segment(&self) -> Segment {
        Segment::control(
            self.sender.next_seq(),
            self.receiver.ack_number(),
            self.receiver.window(),
            Control::ACK,
        )
    }

    /// Send `seg` to the confirmed peer.
    async fn transmit(&mut self, seg: &Segment) -> Result<(), ConnError> {
        let peer = self.peer.ok_or(ConnError::BadState(self.state))?;
        let n = self.socket.send_to(seg, peer).await?;
        self.stats.record_sent(n);
        log::debug!(
            "[microtcp] → {} seq={} ack={} win={} len={}",
            seg.header.control,
            seg.header.seq,
            seg.header.ack,
            seg.header.window,
            seg.payload.len()
        );
        Ok(())
    }

    /// Wait at most `wait` for a valid segment from any address.
    async fn next_segment(
        &mut self,
        wait: Duration,
    ) -> Result<Option<(Segment, SocketAddr)>, ConnError> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = until(deadline);
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.socket.recv_from(remaining).await? {
                Incoming::TimedOut => return Ok(None),
                Incoming::Corrupt(e, from) => {
                    log::debug!("[microtcp] ✗ discarding datagram from {from}: {e}");
                }
                Incoming::Segment(seg, from) => {
                    if self.peer.is_some_and(|peer| peer != from) {
                        log::trace!("[microtcp] ignoring segment from stranger {from}");
                        continue;
                    }
                    self.stats.record_received(seg.wire_len());
                    log::debug!(
                        "[microtcp] ← {} seq={} ack={} win={} len={}",
                        seg.header.control,
                        seg.header.seq,
                        seg.header.ack,
                        seg.header.window,
                        seg.payload.len()
                    );
                    return Ok(Some((seg, from)));
                }
            }
        }
    }

    /// Wait at most `wait` for a valid segment from the confirmed peer.
    async fn next_from_peer(&mut self, wait: Duration) -> Result<Option<Segment>, ConnError> {
        Ok(self.next_segment(wait).await?.map(|(seg, _)| seg))
    }

    fn require_fresh(&self) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::Closed if self.spent => Err(ConnError::Closed),
            ConnectionState::Closed => Ok(()),
            s => Err(ConnError::BadState(s)),
        }
    }

    fn require_open(&self, allowed: fn(ConnectionState) -> bool) -> Result<(), ConnError> {
        match self.state {
            s if allowed(s) => Ok(()),
            ConnectionState::Closed if self.spent => Err(ConnError::Closed),
            s => Err(ConnError::BadState(s)),
        }
    }

    /// Invalidate the connection if `result` is an error.
    fn settle<T>(&mut self, result: Result<T, ConnError>) -> Result<T, ConnError> {
        if let Err(e) = &result {
            log::warn!("[microtcp] {e} in state {}; connection invalidated", self.state);
            self.state = ConnectionState::Invalid;
            self.spent = true;
            self.release();
        }
        result
    }

    fn release(&mut self) {
        self.receiver.release();
        self.sender.release();
    }
}

/// Time left until `deadline`, zero if it has passed.
fn until(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
