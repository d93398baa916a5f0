//! Integration tests for reliable data transfer.
//!
//! Each test spins up two in-process endpoints talking over the loopback
//! interface.  Both sides run as separate tokio tasks so they can make
//! progress concurrently.  Faults are injected on the sending path by
//! wrapping a side's transport in a [`Simulator`].

use std::net::SocketAddr;
use std::time::Duration;

use microtcp::{
    simulator::{Simulator, SimulatorConfig},
    socket::Socket,
    transport::UdpTransport,
    Config, Connection, ConnectionState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn quick() -> Config {
    Config {
        ack_timeout: Duration::from_millis(40),
        handshake_timeout: Duration::from_millis(100),
        time_wait: Duration::from_millis(300),
        idle_timeout: Some(Duration::from_secs(10)),
        ..Config::default()
    }
}

async fn endpoint(config: Config) -> Connection {
    Connection::bind(loopback(), config).await.expect("bind")
}

async fn simulated(config: Config, faults: SimulatorConfig) -> Connection {
    let udp = UdpTransport::bind(loopback()).await.expect("bind");
    let socket = Socket::with_transport(Simulator::new(udp, faults)).expect("socket");
    Connection::new(socket, config).expect("connection")
}

/// Deterministic, non-repeating-looking payload.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Accept one connection, read until EOF, close, and return what arrived.
fn spawn_sink(mut server: Connection, chunk: usize) -> tokio::task::JoinHandle<(Connection, Vec<u8>)> {
    tokio::spawn(async move {
        server.accept().await.expect("accept");
        let mut received = Vec::new();
        let mut buf = vec![0u8; chunk];
        loop {
            let n = server.recv(&mut buf).await.expect("server recv");
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        server.shutdown().await.expect("server shutdown");
        (server, received)
    })
}

async fn send_and_close(mut client: Connection, server_addr: SocketAddr, data: &[u8]) -> Connection {
    client.connect(server_addr).await.expect("connect");
    assert_eq!(client.send(data).await.expect("client send"), data.len());
    client.shutdown().await.expect("client shutdown");
    client
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn small_message_arrives_intact() {
    let server = endpoint(quick()).await;
    let server_addr = server.local_addr();
    let sink = spawn_sink(server, 1024);

    let client = send_and_close(endpoint(quick()).await, server_addr, b"hello").await;
    let (_, received) = sink.await.unwrap();

    assert_eq!(received, b"hello");
    assert_eq!(client.stats().packets_lost, 0);
}

/// A payload many times the window and the segment size is split, paced by
/// the advertised window, and reassembled byte for byte.
#[tokio::test]
async fn large_payload_with_small_window() {
    let config = Config {
        recv_buffer_len: 2048,
        mss: 300,
        ..quick()
    };
    let server = endpoint(config.clone()).await;
    let server_addr = server.local_addr();
    let sink = spawn_sink(server, 1000);

    let data = pattern(64 * 1024);
    let client = tokio::time::timeout(
        Duration::from_secs(30),
        send_and_close(endpoint(config).await, server_addr, &data),
    )
    .await
    .expect("transfer timed out");
    let (server, received) = sink.await.unwrap();

    assert_eq!(received.len(), data.len());
    assert!(received == data, "payload corrupted in transit");
    // At least one segment per MSS of payload.
    assert!(client.stats().packets_sent as usize >= data.len() / 300);
    assert!(server.stats().bytes_received as usize >= data.len());
}

/// The server's first data ACK is lost: the client retransmits, the server
/// re-acknowledges the duplicate, and the application sees the bytes once.
#[tokio::test]
async fn lost_ack_triggers_retransmission() {
    // Server send #1 is the SYN+ACK, #2 the ACK of the first data segment.
    let server = simulated(quick(), SimulatorConfig::dropping([2])).await;
    let server_addr = server.local_addr();
    let sink = spawn_sink(server, 1024);

    let client = send_and_close(endpoint(quick()).await, server_addr, b"hello").await;
    let (_, received) = sink.await.unwrap();

    assert_eq!(received, b"hello");
    let stats = client.stats();
    assert!(stats.packets_lost >= 1, "no retransmission recorded: {stats}");
    assert!(stats.bytes_lost >= 5);
}

/// A lost data segment is resent; segments that arrived after the gap are
/// held and delivered in order once it fills.
#[tokio::test]
async fn lost_data_segment_is_recovered() {
    let config = Config { mss: 100, ..quick() };
    // Client send #1 is the SYN, #2 the handshake ACK, #3 the first data segment.
    let client = simulated(config.clone(), SimulatorConfig::dropping([3])).await;
    let server = endpoint(config).await;
    let server_addr = server.local_addr();
    let sink = spawn_sink(server, 512);

    let data = pattern(1000);
    let client = send_and_close(client, server_addr, &data).await;
    let (_, received) = sink.await.unwrap();

    assert!(received == data, "payload corrupted in transit");
    assert!(client.stats().packets_lost >= 1);
}

/// Both directions carry data over the same connection.
#[tokio::test]
async fn bidirectional_exchange() {
    let mut server = endpoint(quick()).await;
    let server_addr = server.local_addr();

    let server_task = tokio::spawn(async move {
        server.accept().await.expect("accept");

        let mut request = vec![0u8; 4];
        let mut got = 0;
        while got < request.len() {
            got += server.recv(&mut request[got..]).await.expect("server recv");
        }
        assert_eq!(request, b"Ping");

        server.send(b"Pong!").await.expect("server send");

        let mut buf = [0u8; 16];
        assert_eq!(server.recv(&mut buf).await.expect("server eof"), 0);
        assert_eq!(server.state(), ConnectionState::ClosingReceived);
        server.shutdown().await.expect("server shutdown");
        server
    });

    let mut client = endpoint(quick()).await;
    client.connect(server_addr).await.expect("connect");
    client.send(b"Ping").await.expect("client send");

    let mut reply = vec![0u8; 5];
    let mut got = 0;
    while got < reply.len() {
        got += client.recv(&mut reply[got..]).await.expect("client recv");
    }
    assert_eq!(reply, b"Pong!");

    client.shutdown().await.expect("client shutdown");
    let server = server_task.await.unwrap();

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(server.state(), ConnectionState::Closed);
}

/// A slow reader closes the window; the sender probes and resumes when the
/// reader catches up.  Reads use a chunk smaller than any segment.
#[tokio::test]
async fn slow_reader_throttles_sender() {
    let config = Config {
        recv_buffer_len: 512,
        mss: 200,
        ..quick()
    };
    let mut server = endpoint(config.clone()).await;
    let server_addr = server.local_addr();

    let server_task = tokio::spawn(async move {
        server.accept().await.expect("accept");
        let mut received = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let n = server.recv(&mut buf).await.expect("server recv");
            if n == 0 {
                break;
            }
            assert!(n <= buf.len());
            received.extend_from_slice(&buf[..n]);
        }
        server.shutdown().await.expect("server shutdown");
        received
    });

    let data = pattern(3000);
    let _client = tokio::time::timeout(
        Duration::from_secs(30),
        send_and_close(endpoint(config).await, server_addr, &data),
    )
    .await
    .expect("transfer timed out");

    let received = server_task.await.unwrap();
    assert!(received == data, "payload corrupted in transit");
}

/// Loss, duplication, corruption and reordering in both directions, with
/// fixed seeds so a failure can be replayed.
#[tokio::test]
async fn survives_a_hostile_network() {
    let config = Config {
        mss: 500,
        max_retransmissions: 100,
        max_handshake_attempts: 20,
        time_wait: Duration::from_millis(800),
        ..quick()
    };
    let faults = |seed| SimulatorConfig {
        loss_rate: 0.1,
        duplicate_rate: 0.05,
        corrupt_rate: 0.05,
        reorder_rate: 0.1,
        seed,
        ..SimulatorConfig::default()
    };

    let server = simulated(config.clone(), faults(7)).await;
    let server_addr = server.local_addr();
    let sink = spawn_sink(server, 4096);

    let client = simulated(config, faults(11)).await;
    let data = pattern(32 * 1024);
    let client = tokio::time::timeout(
        Duration::from_secs(60),
        send_and_close(client, server_addr, &data),
    )
    .await
    .expect("transfer timed out");
    let (server, received) = sink.await.unwrap();

    assert_eq!(received.len(), data.len());
    assert!(received == data, "payload corrupted in transit");
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(server.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn empty_send_completes_immediately() {
    let server = endpoint(quick()).await;
    let server_addr = server.local_addr();
    let sink = spawn_sink(server, 64);

    let client = send_and_close(endpoint(quick()).await, server_addr, b"").await;
    let (_, received) = sink.await.unwrap();

    assert!(received.is_empty());
    assert_eq!(client.state(), ConnectionState::Closed);
}
