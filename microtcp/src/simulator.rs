//! Fault-injecting network layer for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt datagrams.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] wraps any [`Transport`] and applies a configurable fault model
//! to everything it sends:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.      |
//! | Duplication      | Deliver a datagram twice.                          |
//! | Corruption       | Flip one random bit of the datagram.               |
//! | Reordering       | Hold a datagram back until the next one has gone.  |
//! | Scripted faults  | Drop or corrupt the N-th datagram exactly.         |
//!
//! Random faults draw from a [`StdRng`] seeded from the config, so a failing
//! run can be replayed.  Receives pass straight through.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::transport::Transport;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.  Datagram indices in
/// `drop_nth` / `corrupt_nth` count sends on this transport starting at 1.
#[derive(Debug, Clone, Default)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Probability that one bit of a datagram is flipped.
    pub corrupt_rate: f64,
    /// Probability that a datagram is held back behind the next one.
    pub reorder_rate: f64,
    /// Seed for the random faults.
    pub seed: u64,
    /// Send indices that are always dropped.
    pub drop_nth: HashSet<u64>,
    /// Send indices that are always corrupted.
    pub corrupt_nth: HashSet<u64>,
}

impl SimulatorConfig {
    /// A pass-through configuration that drops exactly the listed sends.
    pub fn dropping(indices: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drop_nth: indices.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Counters of the faults applied so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounts {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub reordered: u64,
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    counts: FaultCounts,
    held_back: Option<(Vec<u8>, SocketAddr)>,
}

/// A fault-injecting wrapper around another [`Transport`].
#[derive(Debug)]
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        for p in [
            config.loss_rate,
            config.duplicate_rate,
            config.corrupt_rate,
            config.reorder_rate,
        ] {
            assert!((0.0..=1.0).contains(&p), "fault probability {p} out of range");
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            inner,
            config,
            state: Mutex::new(SimState {
                rng,
                counts: FaultCounts::default(),
                held_back: None,
            }),
        }
    }

    /// Faults applied so far.
    pub fn counts(&self) -> FaultCounts {
        self.lock().counts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // A panic while holding the lock cannot leave the counters torn.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide the fate of one outbound datagram.  Returns the datagrams to put
    /// on the wire now, in order.
    fn plan(&self, buf: &[u8], dest: SocketAddr) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut st = self.lock();
        st.counts.sent += 1;
        let index = st.counts.sent;
        let mut out = Vec::new();

        let drop = self.config.drop_nth.contains(&index)
            || st.rng.random::<f64>() < self.config.loss_rate;
        if drop {
            st.counts.dropped += 1;
            log::debug!("[sim] drop #{index} ({} B) to {dest}", buf.len());
            // A held-back datagram still goes out behind the lost one.
            out.extend(st.held_back.take());
            return out;
        }

        let mut bytes = buf.to_vec();
        let corrupt = self.config.corrupt_nth.contains(&index)
            || st.rng.random::<f64>() < self.config.corrupt_rate;
        if corrupt && !bytes.is_empty() {
            let bit = st.rng.random_range(0..bytes.len() * 8);
            bytes[bit / 8] ^= 1 << (bit % 8);
            st.counts.corrupted += 1;
            log::debug!("[sim] corrupt #{index} bit {bit}");
        }

        let duplicate = st.rng.random::<f64>() < self.config.duplicate_rate;
        let reorder = st.held_back.is_none() && st.rng.random::<f64>() < self.config.reorder_rate;

        if reorder {
            st.counts.reordered += 1;
            log::debug!("[sim] hold back #{index}");
            st.held_back = Some((bytes, dest));
            return out;
        }

        if duplicate {
            st.counts.duplicated += 1;
            out.push((bytes.clone(), dest));
        }
        out.push((bytes, dest));
        out.extend(st.held_back.take());
        out
    }
}

#[async_trait]
impl<T: Transport> Transport for Simulator<T> {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        for (bytes, to) in self.plan(buf, dest) {
            self.inner.send_to(&bytes, to).await?;
        }
        // The caller sees a successful send whatever the network did with it.
        Ok(buf.len())
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        // Time has passed since the last send; let a held datagram go.
        let held = self.lock().held_back.take();
        if let Some((bytes, to)) = held {
            self.inner.send_to(&bytes, to).await?;
        }
        self.inner.recv_from(buf, wait).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::UdpTransport;

    async fn pair(config: SimulatorConfig) -> (Simulator<UdpTransport>, UdpTransport) {
        let a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        (Simulator::new(a, config), b)
    }

    async fn recv_all(t: &UdpTransport) -> Vec<Vec<u8>> {
        let mut got = Vec::new();
        let mut buf = [0u8; 64];
        while let Some((n, _)) = t.recv_from(&mut buf, Duration::from_millis(100)).await.unwrap() {
            got.push(buf[..n].to_vec());
        }
        got
    }

    #[tokio::test]
    async fn default_config_is_transparent() {
        let (sim, b) = pair(SimulatorConfig::default()).await;
        let to = b.local_addr().unwrap();
        for msg in [b"one", b"two"] {
            assert_eq!(sim.send_to(msg, to).await.unwrap(), 3);
        }
        assert_eq!(recv_all(&b).await, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(sim.counts().dropped, 0);
    }

    #[tokio::test]
    async fn scripted_drop_removes_exactly_that_datagram() {
        let (sim, b) = pair(SimulatorConfig::dropping([2])).await;
        let to = b.local_addr().unwrap();
        for msg in [b"one", b"two", b"tri"] {
            sim.send_to(msg, to).await.unwrap();
        }
        assert_eq!(recv_all(&b).await, vec![b"one".to_vec(), b"tri".to_vec()]);
        assert_eq!(sim.counts().dropped, 1);
    }

    #[tokio::test]
    async fn scripted_corruption_flips_one_bit() {
        let config = SimulatorConfig {
            corrupt_nth: [1].into_iter().collect(),
            ..SimulatorConfig::default()
        };
        let (sim, b) = pair(config).await;
        sim.send_to(b"abcd", b.local_addr().unwrap()).await.unwrap();
        let got = recv_all(&b).await;
        let flipped: u32 = got[0]
            .iter()
            .zip(b"abcd")
            .map(|(x, y)| (x ^ y).count_ones())
            .sum();
        assert_eq!(flipped, 1);
    }

    #[tokio::test]
    async fn certain_reorder_swaps_neighbours() {
        let config = SimulatorConfig {
            reorder_rate: 1.0,
            ..SimulatorConfig::default()
        };
        let (sim, b) = pair(config).await;
        let to = b.local_addr().unwrap();
        sim.send_to(b"first", to).await.unwrap();
        sim.send_to(b"second", to).await.unwrap();
        assert_eq!(recv_all(&b).await, vec![b"second".to_vec(), b"first".to_vec()]);
    }
}
