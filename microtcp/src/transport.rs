//! Datagram transport adapter.
//!
//! The protocol engine needs exactly three things from the network: bind a
//! local address, send a datagram to an address, and receive a datagram with
//! a bounded wait while learning who sent it.  [`Transport`] captures that
//! contract; [`UdpTransport`] fulfils it with a tokio `UdpSocket`, and
//! [`crate::simulator::Simulator`] wraps any transport to inject faults.
//!
//! Datagrams may be lost, duplicated, reordered or corrupted; nothing here
//! promises otherwise.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

/// An unreliable, unordered datagram service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `buf` as one datagram to `dest`, returning the bytes handed to the
    /// network.
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize>;

    /// Wait at most `wait` for one datagram.
    ///
    /// Returns `Ok(None)` when the wait expires without traffic.
    async fn recv_from(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Address this transport is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// [`Transport`] over a real UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind a new UDP socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, dest).await
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
        wait: Duration,
    ) -> io::Result<Option<(usize, SocketAddr)>> {
        match tokio::time::timeout(wait, self.inner.recv_from(buf)).await {
            Ok(Ok(received)) => Ok(Some(received)),
            // An ICMP port-unreachable from an earlier send surfaces here on
            // some platforms; it says nothing about the datagram we wait for.
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => Ok(None),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn datagram_reaches_peer_with_sender_address() {
        let a = loopback().await;
        let b = loopback().await;

        let sent = a.send_to(b"ping", b.local_addr().unwrap()).await.unwrap();
        assert_eq!(sent, 4);

        let mut buf = [0u8; 16];
        let (n, from) = b
            .recv_from(&mut buf, Duration::from_secs(2))
            .await
            .unwrap()
            .expect("datagram");
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn recv_times_out_when_idle() {
        let a = loopback().await;
        let mut buf = [0u8; 16];
        let got = a.recv_from(&mut buf, Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
    }
}
